use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::UNKNOWN_YEAR;
use crate::domain::{
    CanonicalRecord, MalformedRow, Severity, SourcedRecord, TableOutcome, TableStatus,
    ValidationIssue, ValidationReport,
};
use crate::pipeline::processing::normalize::amount::{is_percentage, parses_as_amount};

static FOUR_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{4}$").expect("valid regex"));

/// Everything the validator looks at: the consolidated records with their provenance,
/// rows that could not be read as records, and per-table outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationInput {
    pub records: Vec<SourcedRecord>,
    #[serde(default)]
    pub malformed: Vec<MalformedRow>,
    #[serde(default)]
    pub tables: Vec<TableOutcome>,
}

/// Trait for implementing the audit over a consolidated record set
pub trait Validator {
    /// Pure and deterministic; invalid input becomes issues, never an error
    fn validate(&self, input: &ValidationInput) -> ValidationReport;
}

/// Configuration for the default rule set
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// How many example rows or values an aggregated issue message lists
    pub max_examples: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { max_examples: 5 }
    }
}

/// Default validator with structural, field-quality, consistency and statistical checks
#[derive(Debug, Clone, Default)]
pub struct DefaultValidator {
    pub config: ValidatorConfig,
}

impl DefaultValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Rows that do not have exactly the four canonical text fields
    fn structural_issues(&self, input: &ValidationInput) -> Vec<ValidationIssue> {
        if input.malformed.is_empty() {
            return Vec::new();
        }
        let examples: Vec<String> = input
            .malformed
            .iter()
            .map(|m| format!("{} row {} ({})", m.table_id, m.row, m.reason))
            .collect();
        vec![ValidationIssue {
            severity: Severity::Critical,
            message: format!(
                "{} rows do not have exactly the four canonical fields: {}",
                input.malformed.len(),
                self.examples(&examples)
            ),
            affected_rows: input.malformed.len(),
        }]
    }

    fn field_quality_issues(&self, records: &[SourcedRecord]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let rows_where = |pred: &dyn Fn(&CanonicalRecord) -> bool| -> Vec<usize> {
            records
                .iter()
                .enumerate()
                .filter(|(_, r)| pred(&r.record))
                .map(|(i, _)| i + 1)
                .collect()
        };

        let empty_type = rows_where(&|r: &CanonicalRecord| r.record_type.trim().is_empty());
        if !empty_type.is_empty() {
            issues.push(ValidationIssue {
                severity: Severity::Critical,
                message: format!(
                    "{} rows have an empty type (classification failed), rows {}",
                    empty_type.len(),
                    self.row_list(&empty_type)
                ),
                affected_rows: empty_type.len(),
            });
        }

        let empty_amount = rows_where(&|r: &CanonicalRecord| r.amount.trim().is_empty());
        if !empty_amount.is_empty() {
            issues.push(ValidationIssue {
                severity: Severity::Critical,
                message: format!(
                    "{} rows have an empty amount, rows {}",
                    empty_amount.len(),
                    self.row_list(&empty_amount)
                ),
                affected_rows: empty_amount.len(),
            });
        }

        let bad_year: Vec<&str> = records
            .iter()
            .map(|r| r.record.year.as_str())
            .filter(|y| *y != UNKNOWN_YEAR && !FOUR_DIGITS.is_match(y))
            .collect();
        if !bad_year.is_empty() {
            issues.push(ValidationIssue {
                severity: Severity::Major,
                message: format!(
                    "{} rows have a year that is neither four digits nor {}: {}",
                    bad_year.len(),
                    UNKNOWN_YEAR,
                    self.quoted(&bad_year)
                ),
                affected_rows: bad_year.len(),
            });
        }

        let unparsable: Vec<&str> = records
            .iter()
            .map(|r| r.record.amount.as_str())
            .filter(|a| !a.trim().is_empty() && !parses_as_amount(a))
            .collect();
        if !unparsable.is_empty() {
            issues.push(ValidationIssue {
                severity: Severity::Minor,
                message: format!(
                    "{} amounts are not signed decimals or percentages: {}",
                    unparsable.len(),
                    self.quoted(&unparsable)
                ),
                affected_rows: unparsable.len(),
            });
        }

        let empty_article = rows_where(&|r: &CanonicalRecord| r.article.trim().is_empty());
        if !empty_article.is_empty() {
            issues.push(ValidationIssue {
                severity: Severity::Info,
                message: format!("{} rows carry no specific article", empty_article.len()),
                affected_rows: empty_article.len(),
            });
        }

        issues
    }

    /// Duplicates, conflicting amounts and mixed amount formats. Groups are keyed by field
    /// values so the outcome does not depend on record order.
    fn consistency_issues(&self, records: &[SourcedRecord]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let mut exact: BTreeMap<&CanonicalRecord, usize> = BTreeMap::new();
        let mut near: BTreeMap<(&str, &str, &str), BTreeMap<&str, usize>> = BTreeMap::new();
        for r in records {
            let record = &r.record;
            *exact.entry(record).or_default() += 1;
            *near
                .entry((
                    record.record_type.as_str(),
                    record.article.as_str(),
                    record.year.as_str(),
                ))
                .or_default()
                .entry(record.amount.as_str())
                .or_default() += 1;
        }

        for (record, count) in exact.into_iter().filter(|(_, c)| *c > 1) {
            issues.push(ValidationIssue {
                severity: Severity::Minor,
                message: format!(
                    "Duplicate record (type={:?}, article={:?}, amount={:?}, year={:?}) \
                     occurs {} times",
                    record.record_type, record.article, record.amount, record.year, count
                ),
                affected_rows: count,
            });
        }

        let conflicts = near.into_iter().filter(|(_, amounts)| amounts.len() > 1);
        for ((record_type, article, year), amounts) in conflicts {
            let total: usize = amounts.values().sum();
            let values: Vec<&str> = amounts.keys().copied().collect();
            issues.push(ValidationIssue {
                severity: Severity::Major,
                message: format!(
                    "Conflicting amounts for type={:?}, article={:?}, year={:?}: {} \
                     (possible conflicting sources)",
                    record_type,
                    article,
                    year,
                    values.join(", ")
                ),
                affected_rows: total,
            });
        }

        // type -> (tables with percentages, tables with plain decimals, rows)
        let mut formats: BTreeMap<&str, (BTreeSet<&str>, BTreeSet<&str>, usize)> = BTreeMap::new();
        for r in records.iter().filter(|r| parses_as_amount(&r.record.amount)) {
            let entry = formats.entry(r.record.record_type.as_str()).or_default();
            if is_percentage(&r.record.amount) {
                entry.0.insert(r.table_id.as_str());
            } else {
                entry.1.insert(r.table_id.as_str());
            }
            entry.2 += 1;
        }
        for (record_type, (pct_tables, dec_tables, rows)) in formats {
            let tables: BTreeSet<&str> = pct_tables.union(&dec_tables).copied().collect();
            if !pct_tables.is_empty() && !dec_tables.is_empty() && tables.len() > 1 {
                issues.push(ValidationIssue {
                    severity: Severity::Info,
                    message: format!(
                        "Type {:?} mixes percentage and decimal amounts across tables {}",
                        record_type,
                        tables.into_iter().collect::<Vec<_>>().join(", ")
                    ),
                    affected_rows: rows,
                });
            }
        }

        issues
    }

    /// Per-table share of unresolved years
    fn statistical_issues(&self, records: &[SourcedRecord]) -> Vec<ValidationIssue> {
        let mut per_table: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for r in records {
            let entry = per_table.entry(r.table_id.as_str()).or_default();
            entry.1 += 1;
            if r.record.year == UNKNOWN_YEAR {
                entry.0 += 1;
            }
        }

        per_table
            .into_iter()
            .filter(|(_, (unknown, _))| *unknown > 0)
            .map(|(table_id, (unknown, total))| {
                if unknown == total {
                    ValidationIssue {
                        severity: Severity::Major,
                        message: format!(
                            "Table {} has year {} on all {} rows \
                             (systematic year-inference failure)",
                            table_id, UNKNOWN_YEAR, total
                        ),
                        affected_rows: total,
                    }
                } else {
                    ValidationIssue {
                        severity: Severity::Minor,
                        message: format!(
                            "Table {} has year {} on {} of {} rows",
                            table_id, UNKNOWN_YEAR, unknown, total
                        ),
                        affected_rows: unknown,
                    }
                }
            })
            .collect()
    }

    /// Tables that failed outright or only yielded heuristic records
    fn table_outcome_issues(&self, tables: &[TableOutcome]) -> Vec<ValidationIssue> {
        tables
            .iter()
            .filter_map(|t| match t.status {
                TableStatus::Succeeded => None,
                TableStatus::Failed => Some(ValidationIssue {
                    severity: Severity::Major,
                    message: format!(
                        "Table {} failed normalization after {} attempts; \
                         its {} rows are omitted{}",
                        t.table_id,
                        t.attempts,
                        t.rows_in,
                        t.diagnostic.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default()
                    ),
                    affected_rows: t.rows_in,
                }),
                TableStatus::FallbackApplied => Some(ValidationIssue {
                    severity: Severity::Minor,
                    message: format!(
                        "Table {} used the heuristic fallback after {} attempts; \
                         {} records are best-effort",
                        t.table_id, t.attempts, t.records_out
                    ),
                    affected_rows: t.records_out,
                }),
            })
            .collect()
    }

    fn summarize(
        &self,
        input: &ValidationInput,
        issues: &[ValidationIssue],
        alignment_ok: bool,
    ) -> String {
        let tables: BTreeSet<&str> = input
            .records
            .iter()
            .map(|r| r.table_id.as_str())
            .chain(input.malformed.iter().map(|m| m.table_id.as_str()))
            .chain(input.tables.iter().map(|t| t.table_id.as_str()))
            .collect();
        let count = |s: Severity| issues.iter().filter(|i| i.severity == s).count();
        format!(
            "{} rows from {} tables: {} critical, {} major, {} minor, {} info; column alignment {}",
            input.records.len() + input.malformed.len(),
            tables.len(),
            count(Severity::Critical),
            count(Severity::Major),
            count(Severity::Minor),
            count(Severity::Info),
            if alignment_ok { "ok" } else { "broken" }
        )
    }

    fn row_list(&self, rows: &[usize]) -> String {
        let shown: Vec<String> =
            rows.iter().take(self.config.max_examples).map(|r| r.to_string()).collect();
        self.with_more(shown.join(", "), rows.len())
    }

    fn quoted(&self, values: &[&str]) -> String {
        let shown: Vec<String> = values
            .iter()
            .take(self.config.max_examples)
            .map(|v| format!("{:?}", v))
            .collect();
        self.with_more(shown.join(", "), values.len())
    }

    fn examples(&self, values: &[String]) -> String {
        let shown: Vec<&str> =
            values.iter().take(self.config.max_examples).map(String::as_str).collect();
        self.with_more(shown.join("; "), values.len())
    }

    fn with_more(&self, shown: String, total: usize) -> String {
        if total > self.config.max_examples {
            format!("{} and {} more", shown, total - self.config.max_examples)
        } else {
            shown
        }
    }
}

impl Validator for DefaultValidator {
    fn validate(&self, input: &ValidationInput) -> ValidationReport {
        let mut issues = Vec::new();
        issues.extend(self.structural_issues(input));
        issues.extend(self.field_quality_issues(&input.records));
        issues.extend(self.consistency_issues(&input.records));
        issues.extend(self.statistical_issues(&input.records));
        issues.extend(self.table_outcome_issues(&input.tables));

        // stable: keeps check order within a severity
        issues.sort_by_key(|i| i.severity);

        let column_alignment_ok = input.malformed.is_empty();
        let summary = self.summarize(input, &issues, column_alignment_ok);

        ValidationReport {
            total_rows: input.records.len() + input.malformed.len(),
            column_alignment_ok,
            issues,
            summary,
        }
    }
}
