use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{CanonicalRecord, RawTable, ValidationReport};
use crate::error::GenerationError;

/// One request to the generation service. Re-issued unchanged on retry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub table_id: String,
    /// Instruction text, from the external prompt template plus document context
    pub system: String,
    /// The table's structured content as JSON
    pub user: String,
}

// Generation-side port: the one non-deterministic dependency
#[async_trait]
pub trait GenerationPort: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

// Extraction-side port
#[async_trait]
pub trait TableSourcePort: Send + Sync {
    async fn load_tables(&self) -> anyhow::Result<Vec<RawTable>>;
}

#[async_trait]
pub trait RecordOutputPort: Send + Sync {
    async fn write_records(&self, records: &[CanonicalRecord]) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ReportOutputPort: Send + Sync {
    async fn write_report(&self, report: &ValidationReport) -> anyhow::Result<()>;
}
