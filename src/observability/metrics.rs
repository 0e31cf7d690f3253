//! Metric helpers for the table canonicalization pipeline.
//!
//! Everything goes through the `metrics` facade. No exporter is installed by this crate,
//! so the calls are no-ops unless the embedding application sets a recorder.

/// Generation service calls
pub mod generation {
    /// One call finished with `outcome` (`ok`, `transient`, `rate_limited`, `timeout`, `rejected`)
    pub fn call_finished(outcome: &str) {
        ::metrics::counter!("table_canon_generation_calls_total", "outcome" => outcome.to_string())
            .increment(1);
    }

    pub fn key_rotated() {
        ::metrics::counter!("table_canon_generation_key_rotations_total").increment(1);
    }
}

/// Per-table orchestration
pub mod tables {
    pub fn table_finished(status: &str, attempts: u32) {
        ::metrics::counter!("table_canon_tables_total", "status" => status.to_string())
            .increment(1);
        ::metrics::histogram!("table_canon_attempts").record(attempts as f64);
    }
}

pub mod normalize {
    /// Records emitted by a table, labeled with the strategy that produced them
    pub fn records_emitted(strategy: &str, count: usize) {
        ::metrics::counter!("table_canon_records_emitted_total", "strategy" => strategy.to_string())
            .increment(count as u64);
    }

    pub fn batch_processed(tables: usize) {
        ::metrics::histogram!("table_canon_batch_size").record(tables as f64);
    }
}

pub mod validation {
    pub fn issue_detected(severity: &str) {
        ::metrics::counter!(
            "table_canon_validation_issues_total",
            "severity" => severity.to_string()
        )
        .increment(1);
    }

    pub fn rows_audited(rows: usize) {
        ::metrics::histogram!("table_canon_validation_rows").record(rows as f64);
    }
}
