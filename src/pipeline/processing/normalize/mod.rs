//! Record normalization: per-field cleanup rules plus table-level unpivoting.

pub mod amount;
pub mod fallback;
pub mod unpivot;
pub mod year;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::constants::UNCLASSIFIED_TYPE;
use crate::domain::{CanonicalRecord, RawTable, Strategy};

use amount::{clean_amount, has_digit};
use unpivot::{expand_row, is_year_column, year_columns, PeriodCell, YearColumn};
use year::{resolve_year, YearInputs, FULL_CHAIN};

static TITLE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(table|exhibit|figure|chart)\s*[0-9A-Z.]*\s*[:.\-–—]\s*")
        .expect("valid regex")
});
static PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("valid regex"));
static YEAR_OR_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:FY|CY)?(?:19|20)\d{2}(?:\s*[-–—/]\s*(?:19|20)?\d{2})?\b")
        .expect("valid regex")
});

const DANGLING_WORDS: &[&str] = &["for", "in", "of", "by", "during", "from", "to", "and", "the"];

/// Result of normalizing all candidate records of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableNormalization {
    pub records: Vec<CanonicalRecord>,
    pub strategy: Strategy,
    /// Candidates classified as structurally void (separator rows and the like)
    pub void_rows: usize,
}

/// Trait for turning coerced candidates into canonical records
pub trait Normalizer {
    /// Normalize every candidate of a table. Never fails; worst case values pass through
    /// with conservative cleanup.
    fn normalize_table(
        &self,
        candidates: &[CanonicalRecord],
        table: &RawTable,
    ) -> TableNormalization;
}

/// Default rule set: amount cleanup, year chain, title-derived types, unpivoting
#[derive(Debug, Default, Clone)]
pub struct DefaultNormalizer;

impl DefaultNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one candidate. Returns `None` only for a structurally void row.
    pub fn normalize_record(
        &self,
        candidate: &CanonicalRecord,
        table: &RawTable,
        column_header: Option<&str>,
    ) -> Option<CanonicalRecord> {
        let article = candidate.article.trim();
        let amount = clean_amount(&candidate.amount);
        if article.is_empty() && !has_digit(&amount) {
            return None;
        }

        let resolution = resolve_year(
            &YearInputs {
                candidate_year: &candidate.year,
                article,
                column_header,
                context: &table.context,
                title: &table.title,
            },
            FULL_CHAIN,
        );

        Some(CanonicalRecord {
            record_type: resolve_type(&candidate.record_type, &table.title),
            article: resolution.rewritten_article.unwrap_or_else(|| article.to_string()),
            amount,
            year: resolution.year,
        })
    }

    fn unpivot(
        &self,
        candidate: &CanonicalRecord,
        cells: Vec<PeriodCell>,
        table: &RawTable,
    ) -> Vec<CanonicalRecord> {
        let record_type = resolve_type(&candidate.record_type, &table.title);
        let article = candidate.article.trim().to_string();
        cells
            .into_iter()
            .map(|cell| CanonicalRecord {
                record_type: record_type.clone(),
                article: article.clone(),
                amount: clean_amount(&cell.amount),
                year: cell.year,
            })
            .collect()
    }
}

impl Normalizer for DefaultNormalizer {
    fn normalize_table(
        &self,
        candidates: &[CanonicalRecord],
        table: &RawTable,
    ) -> TableNormalization {
        let columns = year_columns(&table.headers);
        let wide = columns.len() >= 2;
        let mut expanded_rows: Vec<usize> = Vec::new();
        let mut records = Vec::with_capacity(candidates.len());
        let mut void_rows = 0;
        let mut merged = 0;

        for candidate in candidates {
            let source = locate_source(candidate, table, &expanded_rows);

            if wide {
                if let Some((row_idx, column)) = source {
                    let period_cells = expand_row(&table.rows[row_idx], &columns)
                        .filter(|cells| from_period_cells(candidate, column, cells, &columns));
                    if let Some(cells) = period_cells {
                        if expanded_rows.contains(&row_idx) {
                            merged += 1;
                            continue;
                        }
                        debug!(
                            table_id = %table.id,
                            row = row_idx,
                            periods = cells.len(),
                            "unpivoting row"
                        );
                        expanded_rows.push(row_idx);
                        records.extend(self.unpivot(candidate, cells, table));
                        continue;
                    }
                }
            }

            let header = source.and_then(|(_, col)| col).and_then(|c| table.header(c));
            match self.normalize_record(candidate, table, header) {
                Some(record) => records.push(record),
                None => void_rows += 1,
            }
        }

        let strategy = if !expanded_rows.is_empty() {
            Strategy::Unpivot
        } else if merged > 0 {
            Strategy::Merge
        } else if records.len() > table.rows.len() {
            Strategy::Split
        } else {
            Strategy::Direct
        };

        TableNormalization { records, strategy, void_rows }
    }
}

/// True when a candidate on a wide row stands for that row's year cells: its amount sits
/// in a year column, repeats one of the year cells, or is missing altogether. Amounts
/// taken from any other column stay separate records.
fn from_period_cells(
    candidate: &CanonicalRecord,
    column: Option<usize>,
    cells: &[PeriodCell],
    columns: &[YearColumn],
) -> bool {
    let amount = clean_amount(&candidate.amount);
    !has_digit(&amount)
        || column.map_or(false, |c| is_year_column(columns, c))
        || cells.iter().any(|cell| clean_amount(&cell.amount) == amount)
}

/// Picks the `type`: the title's core subject phrase when there is one, else the oracle's
/// label, else `Unclassified`.
pub fn resolve_type(candidate_type: &str, title: &str) -> String {
    let subject = title_subject(title);
    if !subject.is_empty() {
        return subject;
    }
    let candidate = candidate_type.trim();
    if !candidate.is_empty() {
        return candidate.to_string();
    }
    UNCLASSIFIED_TYPE.to_string()
}

/// `Table 2: Fuel Prices (USD/MMBtu), 2025-2026` -> `Fuel Prices`
pub fn title_subject(title: &str) -> String {
    let without_prefix = TITLE_PREFIX.replace(title, "");
    let without_parens = PARENTHETICAL.replace_all(&without_prefix, " ");
    let without_years = YEAR_OR_RANGE.replace_all(&without_parens, " ");
    let mut words: Vec<&str> = without_years.split_whitespace().collect();

    let is_punct = |c: char| matches!(c, ',' | ':' | ';' | '-' | '–' | '—' | '/' | '|');
    loop {
        let before = words.len();
        while words.last().map_or(false, |w| w.chars().all(is_punct)) {
            words.pop();
        }
        while words.last().map_or(false, |w| {
            DANGLING_WORDS.contains(&w.trim_matches(is_punct).to_lowercase().as_str())
        }) {
            words.pop();
        }
        if words.len() == before {
            break;
        }
    }
    words.join(" ").trim_matches(is_punct).trim().to_string()
}

/// Finds the source row (and, when possible, the column) a candidate was mapped from.
/// Rows already expanded are skipped so that repeated labels map to successive rows.
fn locate_source(
    candidate: &CanonicalRecord,
    table: &RawTable,
    taken: &[usize],
) -> Option<(usize, Option<usize>)> {
    let article = fold(&candidate.article);
    let amount = clean_amount(&candidate.amount);
    let columns = year_columns(&table.headers);

    let amount_column = |row: &[String]| -> Option<usize> {
        if !has_digit(&amount) {
            return None;
        }
        row.iter().position(|cell| has_digit(cell) && clean_amount(cell) == amount)
    };

    let by_article = |skip_taken: bool| {
        table.rows.iter().enumerate().find(|(idx, row)| {
            !(skip_taken && taken.contains(idx))
                && !article.is_empty()
                && row.iter().enumerate().any(|(col, cell)| {
                    !is_year_column(&columns, col) && fold(cell) == article
                })
        })
    };

    if let Some((idx, row)) = by_article(true).or_else(|| by_article(false)) {
        return Some((idx, amount_column(row)));
    }
    if article.is_empty() {
        return table
            .rows
            .iter()
            .enumerate()
            .find_map(|(idx, row)| amount_column(row).map(|col| (idx, Some(col))));
    }
    None
}

fn fold(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
