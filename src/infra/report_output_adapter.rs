use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::app::ports::ReportOutputPort;
use crate::domain::ValidationReport;

/// Writes the validation report as pretty-printed JSON
pub struct JsonReportWriter {
    path: PathBuf,
}

impl JsonReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportOutputPort for JsonReportWriter {
    async fn write_report(&self, report: &ValidationReport) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
        }
        let mut json = serde_json::to_string_pretty(report)?;
        json.push('\n');
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!("Wrote validation report to {}", self.path.display());
        Ok(())
    }
}
