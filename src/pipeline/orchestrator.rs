//! Per-table normalization state machine: request, parse, retry, fall back.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::app::ports::{GenerationPort, GenerationRequest};
use crate::config::OrchestratorConfig;
use crate::domain::{CanonicalRecord, FailureKind, RawTable, Strategy, TableOutcome, TableStatus};
use crate::error::{CanonError, GenerationError};
use crate::observability::metrics;
use crate::pipeline::processing::coerce::coerce_all;
use crate::pipeline::processing::normalize::fallback::heuristic_records;
use crate::pipeline::processing::normalize::{Normalizer, TableNormalization};
use crate::pipeline::processing::recovery::decode_reply;
use crate::pipeline::request::RequestBuilder;

const SNIPPET_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Requested,
    Parsing,
    Retrying,
    Succeeded,
    FallbackApplied,
    Failed,
}

/// Bookkeeping for one table's attempts
#[derive(Debug, Clone)]
pub struct NormalizationAttempt {
    pub table_id: String,
    pub state: AttemptState,
    pub attempts: u32,
    pub last_failure: Option<FailureKind>,
    pub last_detail: Option<String>,
}

impl NormalizationAttempt {
    fn new(table_id: &str) -> Self {
        Self {
            table_id: table_id.to_string(),
            state: AttemptState::Pending,
            attempts: 0,
            last_failure: None,
            last_detail: None,
        }
    }

    fn transition(&mut self, next: AttemptState) {
        debug!(table_id = %self.table_id, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn record_failure(&mut self, kind: FailureKind, detail: impl Into<String>) {
        self.last_failure = Some(kind);
        self.last_detail = Some(detail.into());
    }
}

/// Records plus outcome for one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableResult {
    pub records: Vec<CanonicalRecord>,
    pub outcome: TableOutcome,
}

// How one failed attempt affects the retry loop
struct AttemptFailure {
    kind: FailureKind,
    detail: String,
    retryable: bool,
    rate_limited: bool,
}

impl AttemptFailure {
    fn from_error(err: CanonError) -> Self {
        let kind = match &err {
            CanonError::ParseFailure { .. } => FailureKind::ParseFailure,
            CanonError::SchemaViolation { .. } => FailureKind::SchemaViolation,
            CanonError::TransientService(_) => FailureKind::TransientServiceError,
            CanonError::RateLimitExceeded(_) => FailureKind::RateLimitExceeded,
            _ => FailureKind::Rejected,
        };
        let detail = match &err {
            CanonError::ParseFailure { detail, .. } if !detail.is_empty() => {
                format!("{}: {}", err, detail)
            }
            _ => err.to_string(),
        };
        Self {
            kind,
            detail,
            retryable: err.is_recoverable(),
            rate_limited: matches!(err, CanonError::RateLimitExceeded(_)),
        }
    }
}

pub struct NormalizationOrchestrator {
    generator: Arc<dyn GenerationPort>,
    normalizer: Arc<dyn Normalizer + Send + Sync>,
    requests: RequestBuilder,
    config: OrchestratorConfig,
    call_timeout: Duration,
}

impl NormalizationOrchestrator {
    pub fn new(
        generator: Arc<dyn GenerationPort>,
        normalizer: Arc<dyn Normalizer + Send + Sync>,
        requests: RequestBuilder,
        config: OrchestratorConfig,
        call_timeout: Duration,
    ) -> Self {
        Self { generator, normalizer, requests, config, call_timeout }
    }

    /// Drives one table to a terminal state. Never returns an error: every failure ends up
    /// in the outcome.
    pub async fn normalize_table(
        &self,
        table: &RawTable,
        cancel: &CancellationToken,
    ) -> TableResult {
        let span = info_span!("normalize_table", table_id = %table.id, rows = table.rows.len());
        self.run(table, cancel).instrument(span).await
    }

    async fn run(&self, table: &RawTable, cancel: &CancellationToken) -> TableResult {
        let mut attempt = NormalizationAttempt::new(&table.id);

        let request = match self.requests.build(table) {
            Ok(r) => r,
            Err(e) => {
                attempt.record_failure(FailureKind::Rejected, e.to_string());
                return self.finish_failed(table, attempt);
            }
        };

        let max_attempts = self.config.max_attempts.max(1);
        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled(table, attempt);
            }

            attempt.attempts += 1;
            attempt.transition(AttemptState::Requested);
            let failure = match self.call(&request, cancel).await {
                None => return self.finish_cancelled(table, attempt),
                Some(Err(err)) => AttemptFailure::from_error(err.into()),
                Some(Ok(reply)) => {
                    attempt.transition(AttemptState::Parsing);
                    info!(
                        attempt = attempt.attempts,
                        reply_len = reply.len(),
                        "generation reply received"
                    );
                    match self.parse_reply(&reply, table) {
                        Ok(normalization) => {
                            return self.finish_succeeded(table, attempt, normalization)
                        }
                        Err(err) => {
                            debug!(
                                attempt = attempt.attempts,
                                snippet = %reply.chars().take(SNIPPET_CHARS).collect::<String>(),
                                "unusable reply"
                            );
                            AttemptFailure::from_error(err)
                        }
                    }
                }
            };

            warn!(
                attempt = attempt.attempts,
                kind = ?failure.kind,
                "attempt failed: {}",
                failure.detail
            );
            attempt.record_failure(failure.kind, failure.detail.clone());

            if !failure.retryable || attempt.attempts >= max_attempts {
                break;
            }

            attempt.transition(AttemptState::Retrying);
            let delay = self.backoff(attempt.attempts, failure.rate_limited);
            tokio::select! {
                _ = cancel.cancelled() => return self.finish_cancelled(table, attempt),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.config.fallback_on_exhaustion {
            let records = heuristic_records(table);
            if !records.is_empty() {
                return self.finish_fallback(table, attempt, records);
            }
            let exhausted = CanonError::FallbackExhausted { table_id: table.id.clone() };
            attempt.last_detail = Some(match attempt.last_detail.take() {
                Some(detail) => format!("{}; {}", detail, exhausted),
                None => exhausted.to_string(),
            });
        }
        self.finish_failed(table, attempt)
    }

    // `None` means cancelled while waiting
    async fn call(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Option<Result<String, GenerationError>> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(self.call_timeout, self.generator.generate(request)) => {
                let timed_out = GenerationError::Timeout(self.call_timeout.as_secs());
                Some(result.unwrap_or(Err(timed_out)))
            }
        }
    }

    fn parse_reply(&self, reply: &str, table: &RawTable) -> Result<TableNormalization, CanonError> {
        let payload = decode_reply(reply)?;
        for note in &payload.notes {
            info!(note = %note, "generation note");
        }
        let candidates = coerce_all(&payload.elements)?;
        Ok(self.normalizer.normalize_table(&candidates, table))
    }

    fn backoff(&self, attempts: u32, rate_limited: bool) -> Duration {
        let base = if rate_limited {
            self.config.rate_limit_backoff_ms
        } else {
            self.config.backoff_ms
        };
        let factor = 1u64 << attempts.saturating_sub(1).min(16);
        Duration::from_millis(base.saturating_mul(factor))
    }

    fn finish_succeeded(
        &self,
        table: &RawTable,
        mut attempt: NormalizationAttempt,
        normalization: TableNormalization,
    ) -> TableResult {
        attempt.transition(AttemptState::Succeeded);
        let TableNormalization { records, strategy, void_rows } = normalization;
        info!(
            attempts = attempt.attempts,
            records = records.len(),
            strategy = strategy.as_str(),
            void_rows,
            "table normalized"
        );
        self.finish(table, attempt, TableStatus::Succeeded, strategy, records, None)
    }

    fn finish_fallback(
        &self,
        table: &RawTable,
        mut attempt: NormalizationAttempt,
        records: Vec<CanonicalRecord>,
    ) -> TableResult {
        attempt.transition(AttemptState::FallbackApplied);
        warn!(
            attempts = attempt.attempts,
            records = records.len(),
            "retries exhausted, heuristic fallback applied"
        );
        let diagnostic = attempt.last_detail.clone();
        let status = TableStatus::FallbackApplied;
        self.finish(table, attempt, status, Strategy::Direct, records, diagnostic)
    }

    fn finish_failed(&self, table: &RawTable, mut attempt: NormalizationAttempt) -> TableResult {
        attempt.transition(AttemptState::Failed);
        let diagnostic = attempt
            .last_detail
            .clone()
            .unwrap_or_else(|| "no usable reply".to_string());
        warn!(attempts = attempt.attempts, "table failed: {}", diagnostic);
        let status = TableStatus::Failed;
        self.finish(table, attempt, status, Strategy::Direct, Vec::new(), Some(diagnostic))
    }

    fn finish_cancelled(&self, table: &RawTable, mut attempt: NormalizationAttempt) -> TableResult {
        attempt.record_failure(FailureKind::Cancelled, "cancelled");
        attempt.transition(AttemptState::Failed);
        info!(attempts = attempt.attempts, "table cancelled");
        let diagnostic = Some("cancelled".to_string());
        self.finish(table, attempt, TableStatus::Failed, Strategy::Direct, Vec::new(), diagnostic)
    }

    fn finish(
        &self,
        table: &RawTable,
        attempt: NormalizationAttempt,
        status: TableStatus,
        strategy: Strategy,
        records: Vec<CanonicalRecord>,
        diagnostic: Option<String>,
    ) -> TableResult {
        metrics::tables::table_finished(&status.to_string(), attempt.attempts);
        if !records.is_empty() {
            metrics::normalize::records_emitted(strategy.as_str(), records.len());
        }
        TableResult {
            outcome: TableOutcome {
                table_id: table.id.clone(),
                status,
                attempts: attempt.attempts,
                strategy,
                last_failure: attempt.last_failure,
                rows_in: table.rows.len(),
                records_out: records.len(),
                diagnostic,
            },
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::normalize::DefaultNormalizer;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Replays scripted replies in order; repeats the last one when the script runs out
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<Result<String, GenerationError>>>,
        calls: Arc<Mutex<Vec<GenerationRequest>>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl GenerationPort for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            self.calls.lock().await.push(request.clone());
            let mut replies = self.replies.lock().await;
            let next = if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            };
            next.unwrap_or_else(|| Err(GenerationError::Transient("empty script".into())))
        }
    }

    struct HangingGenerator;

    #[async_trait]
    impl GenerationPort for HangingGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
            std::future::pending::<()>().await;
            Ok(String::new())
        }
    }

    fn config(fallback: bool) -> OrchestratorConfig {
        OrchestratorConfig {
            max_attempts: 3,
            backoff_ms: 1,
            rate_limit_backoff_ms: 1,
            concurrency: 1,
            fallback_on_exhaustion: fallback,
        }
    }

    fn orchestrator(
        generator: Arc<dyn GenerationPort>,
        fallback: bool,
    ) -> NormalizationOrchestrator {
        NormalizationOrchestrator::new(
            generator,
            Arc::new(DefaultNormalizer::new()),
            RequestBuilder::default(),
            config(fallback),
            Duration::from_millis(200),
        )
    }

    const FUEL_REPLY: &str =
        r#"[{"type":"Fuel","article":"US Henry Hub","amount":"3.45","year":"2025"}]"#;

    fn fuel_table() -> RawTable {
        RawTable::new(
            "fuel",
            "Fuel Prices",
            vec!["Region".into(), "2025 Avg".into(), "2026 Avg".into()],
            vec![vec!["US Henry Hub".into(), "3.45".into(), "4.00".into()]],
            "",
        )
    }

    fn notes_table() -> RawTable {
        RawTable::new(
            "notes",
            "Notes",
            vec!["Item".into(), "Comment".into()],
            vec![vec!["Alpha".into(), "see appendix".into()]],
            "",
        )
    }

    #[tokio::test]
    async fn succeeds_on_first_reply() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(
            r#"[{"type":"Fuel","article":"US Henry Hub","amount":3.45,"year":""}]"#.into(),
        )]));
        let result = orchestrator(generator, true)
            .normalize_table(&fuel_table(), &CancellationToken::new())
            .await;

        assert_eq!(result.outcome.status, TableStatus::Succeeded);
        assert_eq!(result.outcome.attempts, 1);
        assert_eq!(result.outcome.strategy, Strategy::Unpivot);
        assert_eq!(
            result.records,
            vec![
                CanonicalRecord::new("Fuel Prices", "US Henry Hub", "3.45", "2025"),
                CanonicalRecord::new("Fuel Prices", "US Henry Hub", "4.00", "2026"),
            ]
        );
    }

    #[tokio::test]
    async fn retries_unchanged_request_after_parse_failure() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("Sorry, I cannot help with that.".into()),
            Ok(r#"```json
[{"type":"Fuel","article":"US Henry Hub","amount":"3.45","year":"2025"}]
```"#
                .into()),
        ]));
        let calls = generator.calls.clone();
        let result = orchestrator(generator, true)
            .normalize_table(&fuel_table(), &CancellationToken::new())
            .await;

        assert_eq!(result.outcome.status, TableStatus::Succeeded);
        assert_eq!(result.outcome.attempts, 2);
        assert_eq!(result.outcome.last_failure, Some(FailureKind::ParseFailure));
        let calls = calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn schema_violation_is_retried() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok(r#"[{"article":"x","amount":"1"}]"#.into()),
            Ok(FUEL_REPLY.into()),
        ]));
        let result = orchestrator(generator, true)
            .normalize_table(&fuel_table(), &CancellationToken::new())
            .await;
        assert_eq!(result.outcome.status, TableStatus::Succeeded);
        assert_eq!(result.outcome.last_failure, Some(FailureKind::SchemaViolation));
    }

    #[tokio::test]
    async fn rate_limit_is_retried_as_its_own_kind() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(GenerationError::RateLimited("tokens per day".into())),
            Ok(FUEL_REPLY.into()),
        ]));
        let result = orchestrator(generator, false)
            .normalize_table(&fuel_table(), &CancellationToken::new())
            .await;

        assert_eq!(result.outcome.status, TableStatus::Succeeded);
        assert_eq!(result.outcome.attempts, 2);
        assert_eq!(result.outcome.last_failure, Some(FailureKind::RateLimitExceeded));
    }

    #[tokio::test]
    async fn exhaustion_applies_fallback() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Err(GenerationError::Transient(
            "reset".into(),
        ))]));
        let calls = generator.calls.clone();
        let result = orchestrator(generator, true)
            .normalize_table(&fuel_table(), &CancellationToken::new())
            .await;

        assert_eq!(result.outcome.status, TableStatus::FallbackApplied);
        assert_eq!(result.outcome.attempts, 3);
        assert_eq!(result.outcome.last_failure, Some(FailureKind::TransientServiceError));
        assert_eq!(calls.lock().await.len(), 3);
        assert_eq!(
            result.records,
            vec![CanonicalRecord::new("Fuel Prices", "US Henry Hub", "3.45", "2025")]
        );
    }

    #[tokio::test]
    async fn exhaustion_without_numeric_cells_fails() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("no json here".into())]));
        let result = orchestrator(generator, true)
            .normalize_table(&notes_table(), &CancellationToken::new())
            .await;

        assert_eq!(result.outcome.status, TableStatus::Failed);
        assert_eq!(result.outcome.attempts, 3);
        assert!(result.records.is_empty());
        assert!(result.outcome.diagnostic.is_some());
    }

    #[tokio::test]
    async fn fallback_can_be_disabled() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("no json here".into())]));
        let result = orchestrator(generator, false)
            .normalize_table(&fuel_table(), &CancellationToken::new())
            .await;
        assert_eq!(result.outcome.status, TableStatus::Failed);
        assert_eq!(result.outcome.records_out, 0);
    }

    #[tokio::test]
    async fn rejection_skips_remaining_attempts() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Err(GenerationError::Rejected {
            status: 401,
            message: "Invalid API Key".into(),
        })]));
        let result = orchestrator(generator, false)
            .normalize_table(&fuel_table(), &CancellationToken::new())
            .await;
        assert_eq!(result.outcome.status, TableStatus::Failed);
        assert_eq!(result.outcome.attempts, 1);
        assert_eq!(result.outcome.last_failure, Some(FailureKind::Rejected));
    }

    #[tokio::test]
    async fn timeouts_count_as_transient() {
        let result = orchestrator(Arc::new(HangingGenerator), false)
            .normalize_table(&fuel_table(), &CancellationToken::new())
            .await;
        assert_eq!(result.outcome.status, TableStatus::Failed);
        assert_eq!(result.outcome.attempts, 3);
        assert_eq!(result.outcome.last_failure, Some(FailureKind::TransientServiceError));
    }

    #[tokio::test]
    async fn cancellation_ends_in_failed_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = orchestrator(Arc::new(HangingGenerator), true)
            .normalize_table(&fuel_table(), &cancel)
            .await;
        assert_eq!(result.outcome.status, TableStatus::Failed);
        assert_eq!(result.outcome.last_failure, Some(FailureKind::Cancelled));
        assert_eq!(result.outcome.diagnostic.as_deref(), Some("cancelled"));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let orch = NormalizationOrchestrator::new(
            Arc::new(HangingGenerator),
            Arc::new(DefaultNormalizer::new()),
            RequestBuilder::default(),
            OrchestratorConfig {
                backoff_ms: 100,
                rate_limit_backoff_ms: 1000,
                ..OrchestratorConfig::default()
            },
            Duration::from_secs(1),
        );
        assert_eq!(orch.backoff(1, false), Duration::from_millis(100));
        assert_eq!(orch.backoff(3, false), Duration::from_millis(400));
        assert_eq!(orch.backoff(2, true), Duration::from_millis(2000));
    }
}
