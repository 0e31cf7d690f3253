use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::app::ports::TableSourcePort;
use crate::domain::RawTable;

/// The extraction collaborator's export: a document wrapper or a bare list of tables
#[derive(Deserialize)]
#[serde(untagged)]
enum TableExport {
    Document {
        #[serde(default)]
        context: Option<String>,
        tables: Vec<RawTable>,
    },
    Tables(Vec<RawTable>),
}

/// Reads raw tables from a JSON export on disk
pub struct JsonTableSource {
    path: PathBuf,
}

impl JsonTableSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses an export. Document context fills in tables without their own; ragged rows
    /// are made rectangular. An export without tables is an error.
    pub fn parse(content: &str) -> Result<Vec<RawTable>> {
        let export: TableExport =
            serde_json::from_str(content).context("Table export is not valid JSON")?;
        let (context, mut tables) = match export {
            TableExport::Document { context, tables } => (context.unwrap_or_default(), tables),
            TableExport::Tables(tables) => (String::new(), tables),
        };

        if tables.is_empty() {
            bail!("Table export contains no tables");
        }

        for table in &mut tables {
            if table.context.trim().is_empty() && !context.trim().is_empty() {
                table.context = context.clone();
            }
            table.make_rectangular();
        }
        Ok(tables)
    }
}

#[async_trait]
impl TableSourcePort for JsonTableSource {
    async fn load_tables(&self) -> Result<Vec<RawTable>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read table export {}", self.path.display()))?;
        let tables = Self::parse(&content)
            .with_context(|| format!("Invalid table export {}", self.path.display()))?;
        info!("Loaded {} tables from {}", tables.len(), self.path.display());
        Ok(tables)
    }
}
