use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::app::ports::RecordOutputPort;
use crate::constants::{is_canonical_header, CANONICAL_HEADER};
use crate::domain::{CanonicalRecord, MalformedRow, SourcedRecord};
use crate::pipeline::processing::validate::ValidationInput;

/// Writes the consolidated export: header `type,article,amount,year`, one row per record
pub struct CsvRecordWriter {
    path: PathBuf,
}

impl CsvRecordWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn to_bytes(records: &[CanonicalRecord]) -> Result<Vec<u8>> {
        let mut csv = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        csv.write_record(CANONICAL_HEADER)?;
        for record in records {
            csv.write_record(record.as_row())?;
        }
        csv.into_inner().context("Failed to flush CSV buffer")
    }
}

#[async_trait]
impl RecordOutputPort for CsvRecordWriter {
    async fn write_records(&self, records: &[CanonicalRecord]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        }
        let bytes = Self::to_bytes(records)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!("Wrote {} records to {}", records.len(), self.path.display());
        Ok(())
    }
}

/// Reads an existing export back for an offline re-audit
pub struct CsvRecordReader {
    path: PathBuf,
}

impl CsvRecordReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn read(&self) -> Result<ValidationInput> {
        let content = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let source = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "export".to_string());
        Self::parse(&content, &source)
    }

    /// Rows without exactly four fields, and a non-canonical header, become malformed rows.
    /// Every record is attributed to `source`, since an export carries no table provenance.
    pub fn parse(content: &[u8], source: &str) -> Result<ValidationInput> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content);

        let mut input = ValidationInput::default();
        for (index, row) in reader.records().enumerate() {
            let row = row.with_context(|| format!("Unreadable CSV near row {}", index))?;
            if index == 0 {
                let header: Vec<&str> = row.iter().collect();
                if !is_canonical_header(&header) {
                    warn!("Export {} has a non-canonical header: {:?}", source, header);
                    input.malformed.push(MalformedRow {
                        table_id: source.to_string(),
                        row: 0,
                        reason: format!("header is {:?}, expected {:?}", header, CANONICAL_HEADER),
                    });
                }
                continue;
            }
            if row.len() != CANONICAL_HEADER.len() {
                input.malformed.push(MalformedRow {
                    table_id: source.to_string(),
                    row: index,
                    reason: format!("{} fields, expected {}", row.len(), CANONICAL_HEADER.len()),
                });
                continue;
            }
            input.records.push(SourcedRecord {
                table_id: source.to_string(),
                record: CanonicalRecord::new(&row[0], &row[1], &row[2], &row[3]),
            });
        }
        Ok(input)
    }
}
