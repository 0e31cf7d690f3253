//! Wide-to-long expansion of rows that carry one amount per year column.

use super::amount::is_plausible_amount;
use super::year::years_in;

/// A column whose header names exactly one year
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearColumn {
    pub index: usize,
    pub year: String,
}

/// One narrow cell produced from a wide row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodCell {
    pub column: usize,
    pub amount: String,
    pub year: String,
}

/// Year-bearing columns in header order. When two headers name the same year only the
/// first one counts, so every returned column carries a distinct year.
pub fn year_columns(headers: &[String]) -> Vec<YearColumn> {
    let mut columns: Vec<YearColumn> = Vec::new();
    for (index, header) in headers.iter().enumerate() {
        if let [year] = years_in(header).as_slice() {
            if !columns.iter().any(|c| &c.year == year) {
                columns.push(YearColumn { index, year: year.clone() });
            }
        }
    }
    columns
}

/// Splits a row into one cell per year column when at least two of those columns hold a
/// plausible amount. Cells that are blank or non-numeric are skipped.
pub fn expand_row(row: &[String], columns: &[YearColumn]) -> Option<Vec<PeriodCell>> {
    let cells: Vec<PeriodCell> = columns
        .iter()
        .filter_map(|col| {
            let cell = row.get(col.index)?;
            is_plausible_amount(cell).then(|| PeriodCell {
                column: col.index,
                amount: cell.trim().to_string(),
                year: col.year.clone(),
            })
        })
        .collect();
    (cells.len() >= 2).then_some(cells)
}

pub fn is_year_column(columns: &[YearColumn], index: usize) -> bool {
    columns.iter().any(|c| c.index == index)
}
