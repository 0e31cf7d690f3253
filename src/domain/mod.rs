use serde::{Deserialize, Serialize};
use std::fmt;

/// A table as handed over by the extraction collaborator. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    /// Opaque stable identifier, e.g. `page-3-table-1`
    #[serde(alias = "table_id")]
    pub id: String,
    #[serde(default, alias = "table_title", deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default, deserialize_with = "cells_as_text")]
    pub rows: Vec<Vec<String>>,
    /// Free-text excerpt from the surrounding document, only ever used as an inference hint
    #[serde(default, deserialize_with = "null_as_empty")]
    pub context: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// Extraction exports sometimes carry numbers or nulls in cells
fn cells_as_text<'de, D>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let rows: Vec<Vec<serde_json::Value>> = Vec::deserialize(deserializer)?;
    Ok(rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| match cell {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect())
}

impl RawTable {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        context: impl Into<String>,
    ) -> Self {
        let mut table = Self {
            id: id.into(),
            title: title.into(),
            headers,
            rows,
            context: context.into(),
        };
        table.make_rectangular();
        table
    }

    /// Pads short rows with empty cells; a row wider than the header extends the header
    /// with empty labels so every row lines up with `headers`.
    pub fn make_rectangular(&mut self) {
        let width = self
            .rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(self.headers.len());
        self.headers.resize(width, String::new());
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
    }

    pub fn header(&self, column: usize) -> Option<&str> {
        self.headers.get(column).map(String::as_str)
    }
}

/// One row of the fixed four-field canonical schema. All fields are always present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    /// Empty means "no specific entity"
    pub article: String,
    pub amount: String,
    /// Four ASCII digits or `UNKNOWN`
    pub year: String,
}

impl CanonicalRecord {
    pub fn new(
        record_type: impl Into<String>,
        article: impl Into<String>,
        amount: impl Into<String>,
        year: impl Into<String>,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            article: article.into(),
            amount: amount.into(),
            year: year.into(),
        }
    }

    /// Fields in export order
    pub fn as_row(&self) -> [&str; 4] {
        [&self.record_type, &self.article, &self.amount, &self.year]
    }
}

/// A canonical record together with the table it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedRecord {
    pub table_id: String,
    pub record: CanonicalRecord,
}

/// A row that could not even be read as four text fields (re-audit of an export)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRow {
    pub table_id: String,
    /// 1-based data row index in the source file
    pub row: usize,
    pub reason: String,
}

/// Terminal status of one table's normalization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Succeeded,
    FallbackApplied,
    Failed,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::Succeeded => "succeeded",
            TableStatus::FallbackApplied => "fallback_applied",
            TableStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How candidate records were mapped onto source rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One candidate per source row
    Direct,
    /// The oracle emitted more records than there are source rows
    Split,
    /// Several candidates collapsed onto one source row
    Merge,
    /// At least one wide row was expanded into one record per year column
    Unpivot,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Split => "split",
            Strategy::Merge => "merge",
            Strategy::Unpivot => "unpivot",
        }
    }
}

/// Last recoverable failure seen during a table's attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ParseFailure,
    SchemaViolation,
    TransientServiceError,
    RateLimitExceeded,
    Rejected,
    Cancelled,
}

/// Per-table result metadata handed to the validator and the run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table_id: String,
    pub status: TableStatus,
    pub attempts: u32,
    pub strategy: Strategy,
    pub last_failure: Option<FailureKind>,
    pub rows_in: usize,
    pub records_out: usize,
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
            Severity::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    pub affected_rows: usize,
}

/// Final audit output; serialized exactly as these four keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total_rows: usize,
    pub column_alignment_ok: bool,
    pub issues: Vec<ValidationIssue>,
    pub summary: String,
}

impl ValidationReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_rows_are_padded_to_header_width() {
        let table = RawTable::new(
            "t1",
            "",
            vec!["Region".into(), "2025".into(), "2026".into()],
            vec![vec!["US".into()]],
            "",
        );
        assert_eq!(table.rows[0], vec!["US".to_string(), String::new(), String::new()]);
    }

    #[test]
    fn record_serializes_type_key() {
        let record = CanonicalRecord::new("Fuel Prices", "", "3.45", "2025");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"type": "Fuel Prices", "article": "", "amount": "3.45", "year": "2025"})
        );
    }

    #[test]
    fn report_has_exactly_the_four_keys() {
        let report = ValidationReport {
            total_rows: 2,
            column_alignment_ok: true,
            issues: vec![ValidationIssue {
                severity: Severity::Minor,
                message: "m".into(),
                affected_rows: 1,
            }],
            summary: "s".into(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            value,
            json!({
                "total_rows": 2,
                "column_alignment_ok": true,
                "issues": [{"severity": "minor", "message": "m", "affected_rows": 1}],
                "summary": "s"
            })
        );
    }

    #[test]
    fn severities_sort_in_presentation_order() {
        let mut severities =
            vec![Severity::Info, Severity::Minor, Severity::Critical, Severity::Major];
        severities.sort();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::Major, Severity::Minor, Severity::Info]
        );
    }

    #[test]
    fn raw_table_accepts_extractor_field_names() {
        let table: RawTable = serde_json::from_value(json!({
            "table_id": "page-1-table-1",
            "table_title": null,
            "headers": ["A"],
            "rows": [["x"]]
        }))
        .unwrap();
        assert_eq!(table.id, "page-1-table-1");
        assert_eq!(table.title, "");
        assert_eq!(table.context, "");
    }
}
