use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::domain::{
    CanonicalRecord, FailureKind, RawTable, SourcedRecord, Strategy, TableOutcome, TableStatus,
};
use crate::pipeline::orchestrator::{NormalizationOrchestrator, TableResult};

/// Consolidated output of one batch, in table submission order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub records: Vec<SourcedRecord>,
    pub outcomes: Vec<TableOutcome>,
}

impl NormalizedBatch {
    pub fn canonical_records(&self) -> Vec<CanonicalRecord> {
        self.records.iter().map(|r| r.record.clone()).collect()
    }

    pub fn count(&self, status: TableStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Use case for normalizing every raw table of a document concurrently
pub struct NormalizeUseCase {
    orchestrator: Arc<NormalizationOrchestrator>,
    concurrency: usize,
}

impl NormalizeUseCase {
    pub fn new(orchestrator: Arc<NormalizationOrchestrator>, concurrency: usize) -> Self {
        Self { orchestrator, concurrency: concurrency.max(1) }
    }

    /// Normalize all tables, at most `concurrency` at a time.
    ///
    /// Results land in one slot per table, so the consolidated order follows `tables`
    /// whatever order the tasks finish in. Cancelling `cancel` stops tables that are still
    /// pending or in flight; finished tables keep their results.
    pub async fn normalize_all(
        &self,
        tables: Vec<RawTable>,
        cancel: CancellationToken,
    ) -> NormalizedBatch {
        let total = tables.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut slots: Vec<Option<TableResult>> = vec![None; total];
        let mut fallbacks: Vec<(String, usize)> = Vec::with_capacity(total);
        let mut tasks = JoinSet::new();

        for (index, table) in tables.into_iter().enumerate() {
            fallbacks.push((table.id.clone(), table.rows.len()));
            let orchestrator = self.orchestrator.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = orchestrator.normalize_table(&table, &cancel).await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!("Normalization task aborted: {}", e),
            }
        }

        let mut batch = NormalizedBatch::default();
        for (slot, (table_id, rows_in)) in slots.into_iter().zip(fallbacks) {
            let result = slot.unwrap_or_else(|| aborted(table_id, rows_in));
            let table_id = &result.outcome.table_id;
            batch.records.extend(
                result
                    .records
                    .into_iter()
                    .map(|record| SourcedRecord { table_id: table_id.clone(), record }),
            );
            batch.outcomes.push(result.outcome);
        }

        crate::observability::metrics::normalize::batch_processed(total);
        info!(
            tables = total,
            records = batch.records.len(),
            succeeded = batch.count(TableStatus::Succeeded),
            fallback = batch.count(TableStatus::FallbackApplied),
            failed = batch.count(TableStatus::Failed),
            "Normalization batch finished"
        );
        batch
    }
}

// Outcome for a table whose task never reported back
fn aborted(table_id: String, rows_in: usize) -> TableResult {
    TableResult {
        records: Vec::new(),
        outcome: TableOutcome {
            table_id,
            status: TableStatus::Failed,
            attempts: 0,
            strategy: Strategy::Direct,
            last_failure: Some(FailureKind::Cancelled),
            rows_in,
            records_out: 0,
            diagnostic: Some("normalization task aborted".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{GenerationPort, GenerationRequest};
    use crate::config::OrchestratorConfig;
    use crate::error::GenerationError;
    use crate::pipeline::processing::normalize::DefaultNormalizer;
    use crate::pipeline::request::RequestBuilder;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Answers per table id; slower for earlier tables so completion order is reversed
    struct MockGeneration {
        calls: Arc<tokio::sync::Mutex<Vec<String>>>,
    }

    impl MockGeneration {
        fn new() -> Self {
            Self { calls: Arc::new(tokio::sync::Mutex::new(Vec::new())) }
        }
    }

    #[async_trait]
    impl GenerationPort for MockGeneration {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            self.calls.lock().await.push(request.table_id.clone());
            match request.table_id.as_str() {
                "t1" => {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    Ok(r#"[{"type":"A","article":"first","amount":"1","year":"2025"},
                           {"type":"A","article":"second","amount":"2","year":"2025"}]"#
                        .into())
                }
                "t2" => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(r#"[{"type":"B","article":"third","amount":"3","year":"2024"}]"#.into())
                }
                "slow" => {
                    std::future::pending::<()>().await;
                    Ok(String::new())
                }
                _ => Ok("no structure at all".into()),
            }
        }
    }

    fn table(id: &str, rows: &[&str]) -> RawTable {
        RawTable::new(
            id,
            "",
            vec!["Item".into(), "Value".into()],
            rows.iter().map(|r| vec![r.to_string(), String::new()]).collect(),
            "",
        )
    }

    fn use_case(generator: Arc<dyn GenerationPort>, concurrency: usize) -> NormalizeUseCase {
        let orchestrator = NormalizationOrchestrator::new(
            generator,
            Arc::new(DefaultNormalizer::new()),
            RequestBuilder::default(),
            OrchestratorConfig {
                max_attempts: 2,
                backoff_ms: 1,
                rate_limit_backoff_ms: 1,
                concurrency,
                fallback_on_exhaustion: true,
            },
            Duration::from_secs(5),
        );
        NormalizeUseCase::new(Arc::new(orchestrator), concurrency)
    }

    #[tokio::test]
    async fn keeps_table_order_regardless_of_completion() {
        let batch = use_case(Arc::new(MockGeneration::new()), 4)
            .normalize_all(
                vec![table("t1", &["first", "second"]), table("t2", &["third"])],
                CancellationToken::new(),
            )
            .await;

        let articles: Vec<&str> = batch.records.iter().map(|r| r.record.article.as_str()).collect();
        assert_eq!(articles, vec!["first", "second", "third"]);
        assert_eq!(batch.records[2].table_id, "t2");
        assert_eq!(batch.outcomes.len(), 2);
        assert_eq!(batch.count(TableStatus::Succeeded), 2);
    }

    #[tokio::test]
    async fn one_failing_table_does_not_abort_others() {
        let mock = Arc::new(MockGeneration::new());
        let calls = mock.calls.clone();
        let batch = use_case(mock, 2)
            .normalize_all(
                vec![
                    table("t1", &["first", "second"]),
                    table("bad", &["words only"]),
                    table("t2", &["third"]),
                ],
                CancellationToken::new(),
            )
            .await;

        assert_eq!(batch.outcomes[1].status, TableStatus::Failed);
        assert_eq!(batch.outcomes[1].attempts, 2);
        assert_eq!(batch.records.len(), 3);
        assert_eq!(calls.lock().await.iter().filter(|id| *id == "bad").count(), 2);
    }

    #[tokio::test]
    async fn cancellation_keeps_completed_tables() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let batch = use_case(Arc::new(MockGeneration::new()), 2)
            .normalize_all(vec![table("t2", &["third"]), table("slow", &["x 1"])], cancel)
            .await;

        assert_eq!(batch.outcomes[0].status, TableStatus::Succeeded);
        assert_eq!(batch.outcomes[1].status, TableStatus::Failed);
        assert_eq!(batch.outcomes[1].diagnostic.as_deref(), Some("cancelled"));
        assert_eq!(batch.records.len(), 1);
    }
}
