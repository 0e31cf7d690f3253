//! Builds the generation request for one table.

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::app::ports::GenerationRequest;
use crate::domain::RawTable;
use crate::error::{CanonError, Result};

const BUILT_IN_INSTRUCTION: &str = "You convert one extracted table into canonical records.\n\
Reply with a JSON array only. Each element is an object with exactly the keys \
\"type\", \"article\", \"amount\" and \"year\".\n\
- type: the table's subject category.\n\
- article: the specific entity of the row, or an empty string when there is none.\n\
- amount: the numeric value as written in the cell.\n\
- year: the four-digit year the value refers to, or an empty string when unknown.\n\
When a row has one value per year column, emit one object per year column.";

#[derive(Serialize)]
struct TablePayload<'a> {
    table_id: &'a str,
    title: &'a str,
    headers: &'a [String],
    rows: &'a [Vec<String>],
}

/// Instruction text plus the table serialized as JSON
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    template: String,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self { template: BUILT_IN_INSTRUCTION.to_string() }
    }
}

impl RequestBuilder {
    pub fn with_template(template: impl Into<String>) -> Self {
        Self { template: template.into() }
    }

    /// Reads the template from `path`, or uses the built-in instruction when `None`
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let template = fs::read_to_string(p).map_err(|e| {
                    CanonError::Config(format!(
                        "Failed to read prompt template '{}': {}",
                        p.display(),
                        e
                    ))
                })?;
                Ok(Self::with_template(template))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn build(&self, table: &RawTable) -> Result<GenerationRequest> {
        let mut system = self.template.trim_end().to_string();
        let context = table.context.trim();
        if !context.is_empty() {
            system.push_str("\n\n# DOCUMENT CONTEXT\n");
            system.push_str(
                "Context extracted from the source document, for inferring missing years:\n",
            );
            system.push_str(context);
        }

        let user = serde_json::to_string(&TablePayload {
            table_id: &table.id,
            title: &table.title,
            headers: &table.headers,
            rows: &table.rows,
        })?;

        Ok(GenerationRequest { table_id: table.id.clone(), system, user })
    }
}
