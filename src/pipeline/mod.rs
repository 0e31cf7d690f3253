// Canonicalization pipeline: per-table orchestration plus the processing stages

pub mod orchestrator;
pub mod processing;
pub mod request;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::app::normalize_use_case::NormalizeUseCase;
use crate::app::ports::{RecordOutputPort, TableSourcePort};
use crate::app::validate_use_case::ValidateUseCase;
use crate::domain::{TableOutcome, TableStatus, ValidationReport};
use crate::pipeline::processing::validate::ValidationInput;

/// Result of a complete pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_tables: usize,
    /// Records emitted per table, in table order
    pub rows_per_table: Vec<(String, usize)>,
    pub succeeded: usize,
    pub fallback: usize,
    pub failed: usize,
    pub tables: Vec<TableOutcome>,
    pub report: ValidationReport,
}

impl RunSummary {
    /// 1 when every table failed; under `strict`, 2 when only some did; else 0
    pub fn exit_code(&self, strict: bool) -> i32 {
        if self.total_tables == 0 || self.failed == self.total_tables {
            1
        } else if strict && self.failed > 0 {
            2
        } else {
            0
        }
    }
}

pub struct Pipeline {
    source: Box<dyn TableSourcePort>,
    normalize: NormalizeUseCase,
    records_output: Box<dyn RecordOutputPort>,
    validate: ValidateUseCase,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn TableSourcePort>,
        normalize: NormalizeUseCase,
        records_output: Box<dyn RecordOutputPort>,
        validate: ValidateUseCase,
    ) -> Self {
        Self { source, normalize, records_output, validate }
    }

    /// Load, normalize, export, audit. Only missing input or unwritable output is an error;
    /// per-table failures end up in the summary and the report.
    #[instrument(skip_all)]
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "Starting pipeline run");

        let tables = self.source.load_tables().await.context("Failed to load raw tables")?;
        let total_tables = tables.len();

        let batch = self.normalize.normalize_all(tables, cancel).await;

        self.records_output
            .write_records(&batch.canonical_records())
            .await
            .context("Failed to write consolidated records")?;

        let succeeded = batch.count(TableStatus::Succeeded);
        let fallback = batch.count(TableStatus::FallbackApplied);
        let failed = batch.count(TableStatus::Failed);
        let rows_per_table = batch
            .outcomes
            .iter()
            .map(|o| (o.table_id.clone(), o.records_out))
            .collect();

        let input = ValidationInput {
            records: batch.records,
            malformed: Vec::new(),
            tables: batch.outcomes,
        };
        let report = self.validate.validate(&input).await?;

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total_tables,
            rows_per_table,
            succeeded,
            fallback,
            failed,
            tables: input.tables,
            report,
        };
        info!(
            %run_id,
            tables = total_tables,
            succeeded,
            fallback,
            failed,
            "Pipeline run finished: {}",
            summary.report.summary
        );
        Ok(summary)
    }
}
