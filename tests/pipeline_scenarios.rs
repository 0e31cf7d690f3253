use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use table_canon::app::normalize_use_case::NormalizeUseCase;
use table_canon::app::ports::{GenerationPort, GenerationRequest, TableSourcePort};
use table_canon::app::validate_use_case::ValidateUseCase;
use table_canon::config::OrchestratorConfig;
use table_canon::domain::{RawTable, Severity, TableStatus};
use table_canon::error::GenerationError;
use table_canon::infra::{CsvRecordReader, CsvRecordWriter, JsonReportWriter, JsonTableSource};
use table_canon::pipeline::orchestrator::NormalizationOrchestrator;
use table_canon::pipeline::processing::normalize::DefaultNormalizer;
use table_canon::pipeline::request::RequestBuilder;
use table_canon::pipeline::{Pipeline, RunSummary};

/// Fixed reply per table id; unknown tables get prose with no payload
struct MockGeneration {
    replies: HashMap<String, String>,
    calls: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl MockGeneration {
    fn new(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies.iter().map(|(id, r)| (id.to_string(), r.to_string())).collect(),
            calls: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl GenerationPort for MockGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.lock().await.push(request.table_id.clone());
        Ok(self
            .replies
            .get(&request.table_id)
            .cloned()
            .unwrap_or_else(|| "I could not find any numbers in this table.".to_string()))
    }
}

struct StaticTables(Vec<RawTable>);

#[async_trait]
impl TableSourcePort for StaticTables {
    async fn load_tables(&self) -> anyhow::Result<Vec<RawTable>> {
        Ok(self.0.clone())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_attempts: 3,
        backoff_ms: 1,
        rate_limit_backoff_ms: 1,
        concurrency: 2,
        fallback_on_exhaustion: true,
    }
}

struct Run {
    summary: RunSummary,
    csv: String,
    report: Value,
    calls: Vec<String>,
}

async fn run_pipeline(tables: Vec<RawTable>, replies: &[(&str, &str)]) -> Run {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("outputs").join("consolidated.csv");
    let report_path = dir.path().join("outputs").join("validation_report.json");

    let generator = Arc::new(MockGeneration::new(replies));
    let calls = generator.calls.clone();
    let orchestrator = NormalizationOrchestrator::new(
        generator,
        Arc::new(DefaultNormalizer::new()),
        RequestBuilder::default(),
        orchestrator_config(),
        Duration::from_secs(5),
    );
    let pipeline = Pipeline::new(
        Box::new(StaticTables(tables)),
        NormalizeUseCase::new(Arc::new(orchestrator), 2),
        Box::new(CsvRecordWriter::new(&csv_path)),
        ValidateUseCase::with_default_validator(Box::new(JsonReportWriter::new(&report_path))),
    );

    let summary = pipeline.run(CancellationToken::new()).await.unwrap();
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let report = serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    let calls = calls.lock().await.clone();
    Run { summary, csv, report, calls }
}

fn fuel_table() -> RawTable {
    RawTable::new(
        "page-1-table-1",
        "Fuel Prices",
        strings(&["Region", "2025 Avg", "2026 Avg"]),
        vec![strings(&["US Henry Hub", "3.45", "4.00"])],
        "",
    )
}

const FUEL_REPLY: &str =
    r#"[{"type": "Natural gas", "article": "US Henry Hub", "amount": 3.45, "year": null}]"#;

#[tokio::test]
async fn wide_fuel_table_is_unpivoted_into_two_records() {
    let run = run_pipeline(vec![fuel_table()], &[("page-1-table-1", FUEL_REPLY)]).await;

    assert_eq!(
        run.csv,
        "type,article,amount,year\n\
         Fuel Prices,US Henry Hub,3.45,2025\n\
         Fuel Prices,US Henry Hub,4.00,2026\n"
    );
    assert_eq!(run.summary.succeeded, 1);
    assert_eq!(run.summary.rows_per_table, vec![("page-1-table-1".to_string(), 2)]);
    assert_eq!(run.report["total_rows"], 2);
    assert_eq!(run.report["column_alignment_ok"], true);
    assert_eq!(run.summary.exit_code(true), 0);
}

#[tokio::test]
async fn noisy_amounts_are_cleaned() {
    let table = RawTable::new(
        "amounts",
        "Amounts",
        strings(&["Item", "Value"]),
        vec![
            strings(&["Alpha", "4.25(2)"]),
            strings(&["Beta", "2OOO"]),
            strings(&["Gamma", "3,45"]),
        ],
        "",
    );
    let reply = r#"[
        {"type": "Amounts", "article": "Alpha", "amount": "4.25(2)", "year": "2025"},
        {"type": "Amounts", "article": "Beta", "amount": "2OOO", "year": "2025"},
        {"type": "Amounts", "article": "Gamma", "amount": "3,45", "year": "2025"}
    ]"#;
    let run = run_pipeline(vec![table], &[("amounts", reply)]).await;

    assert_eq!(
        run.csv,
        "type,article,amount,year\n\
         Amounts,Alpha,4.25,2025\n\
         Amounts,Beta,2000,2025\n\
         Amounts,Gamma,3.45,2025\n"
    );
}

#[tokio::test]
async fn context_year_fills_missing_years() {
    let table = RawTable::new(
        "outlook",
        "Price Outlook",
        strings(&["Metric", "Value"]),
        vec![strings(&["Growth", "2.5%"]), strings(&["Inflation", "3.1%"])],
        "This outlook covers the forecast period of 2026.",
    );
    let reply = r#"{"rows": [
        {"type": "Outlook", "article": "Growth", "amount": "2.5%", "year": ""},
        {"type": "Outlook", "article": "Inflation", "amount": "3.1%"}
    ], "notes": ["years inferred from context"]}"#;
    let run = run_pipeline(vec![table], &[("outlook", reply)]).await;

    let years: Vec<&str> = run.csv.lines().skip(1).map(|l| l.rsplit(',').next().unwrap()).collect();
    assert_eq!(years, vec!["2026", "2026"]);
}

#[tokio::test]
async fn fenced_reply_matches_bare_reply() {
    let fenced = format!(
        "Here is the result:\n```json\n{}\n```\nLet me know if you need changes.",
        FUEL_REPLY
    );
    let bare = run_pipeline(vec![fuel_table()], &[("page-1-table-1", FUEL_REPLY)]).await;
    let wrapped = run_pipeline(vec![fuel_table()], &[("page-1-table-1", fenced.as_str())]).await;

    assert_eq!(bare.csv, wrapped.csv);
    assert_eq!(wrapped.summary.tables[0].attempts, 1);
}

#[tokio::test]
async fn one_unparsable_table_is_reported_and_omitted() {
    let notes = RawTable::new(
        "notes",
        "Footnotes",
        strings(&["Item", "Comment"]),
        vec![strings(&["Source", "see appendix"]), strings(&["Method", "survey based"])],
        "",
    );
    let rates = RawTable::new(
        "rates",
        "Interest Rates",
        strings(&["Bank", "Rate 2025"]),
        vec![strings(&["Central", "4.5%"])],
        "",
    );
    let rates_reply =
        r#"[{"type": "Rates", "article": "Central", "amount": "4.5%", "year": "2025"}]"#;

    let run = run_pipeline(
        vec![fuel_table(), notes, rates],
        &[("page-1-table-1", FUEL_REPLY), ("rates", rates_reply)],
    )
    .await;

    // the failing table was asked exactly three times
    assert_eq!(run.calls.iter().filter(|id| id.as_str() == "notes").count(), 3);

    assert_eq!(
        run.csv,
        "type,article,amount,year\n\
         Fuel Prices,US Henry Hub,3.45,2025\n\
         Fuel Prices,US Henry Hub,4.00,2026\n\
         Interest Rates,Central,4.5%,2025\n"
    );

    assert_eq!(run.summary.succeeded, 2);
    assert_eq!(run.summary.failed, 1);
    assert_eq!(run.summary.tables[1].status, TableStatus::Failed);
    assert_eq!(run.summary.report.count(Severity::Major), 1);

    let issues = run.report["issues"].as_array().unwrap();
    let failed = issues
        .iter()
        .find(|i| {
            let message = i["message"].as_str().unwrap();
            message.contains("Table notes failed normalization after 3 attempts")
        })
        .expect("failed table is reported");
    assert_eq!(failed["severity"], "major");
    assert_eq!(failed["affected_rows"], 2);

    assert_eq!(run.summary.exit_code(false), 0);
    assert_eq!(run.summary.exit_code(true), 2);
}

#[tokio::test]
async fn every_table_failing_exits_with_one() {
    let notes = RawTable::new(
        "notes",
        "Footnotes",
        strings(&["Item"]),
        vec![strings(&["see appendix"])],
        "",
    );
    let run = run_pipeline(vec![notes], &[]).await;

    assert_eq!(run.csv, "type,article,amount,year\n");
    assert_eq!(run.summary.exit_code(false), 1);
}

#[tokio::test]
async fn json_export_feeds_the_pipeline_and_reaudit_agrees() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tables.json");
    std::fs::write(
        &input,
        r#"{"context": "Figures for 2026", "tables": [
            {"table_id": "t1", "table_title": "Budget", "headers": ["Line", "Amount"],
             "rows": [["Staff", "$1,200"], ["Travel", 300]]}
        ]}"#,
    )
    .unwrap();
    let tables = JsonTableSource::new(&input).load_tables().await.unwrap();
    let reply = r#"[{"type": "Budget", "article": "Staff", "amount": "$1,200", "year": ""},
                    {"type": "Budget", "article": "Travel", "amount": 300, "year": ""}]"#;
    let run = run_pipeline(tables, &[("t1", reply)]).await;

    assert_eq!(
        run.csv,
        "type,article,amount,year\nBudget,Staff,1200,2026\nBudget,Travel,300,2026\n"
    );

    let csv_path = dir.path().join("reaudit.csv");
    std::fs::write(&csv_path, &run.csv).unwrap();
    let reread = CsvRecordReader::new(&csv_path).read().await.unwrap();
    assert!(reread.malformed.is_empty());
    assert_eq!(reread.records.len(), 2);
}
