//! Deterministic partial result for a table whose replies never parsed.

use crate::domain::{CanonicalRecord, RawTable};

use super::amount::{clean_amount, is_plausible_amount};
use super::resolve_type;
use super::year::{resolve_year, YearInputs, STRUCTURAL_CHAIN};

/// One record per raw row that holds a numeric-looking cell.
///
/// `article` is the first non-empty, non-numeric cell under a labelled header, `amount` the
/// first numeric-looking cell. Years come from that cell's column header or the context,
/// never from article text. Rows without any numeric cell are skipped.
pub fn heuristic_records(table: &RawTable) -> Vec<CanonicalRecord> {
    let record_type = resolve_type("", &table.title);

    table
        .rows
        .iter()
        .filter_map(|row| {
            let amount_col = row.iter().position(|cell| is_plausible_amount(cell))?;
            let article = row
                .iter()
                .enumerate()
                .find(|(i, cell)| {
                    let labelled = table.header(*i).map_or(false, |h| !h.trim().is_empty());
                    labelled && !cell.trim().is_empty() && !is_plausible_amount(cell)
                })
                .map(|(_, cell)| cell.trim().to_string())
                .unwrap_or_default();

            let resolution = resolve_year(
                &YearInputs {
                    column_header: table.header(amount_col),
                    context: &table.context,
                    title: &table.title,
                    ..Default::default()
                },
                STRUCTURAL_CHAIN,
            );

            Some(CanonicalRecord {
                record_type: record_type.clone(),
                article,
                amount: clean_amount(&row[amount_col]),
                year: resolution.year,
            })
        })
        .collect()
}
