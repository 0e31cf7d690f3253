use anyhow::{Context, Result};
use tracing::info;

use crate::app::ports::ReportOutputPort;
use crate::domain::{Severity, ValidationReport};
use crate::pipeline::processing::validate::{DefaultValidator, ValidationInput, Validator};

/// Use case for auditing a consolidated record set and persisting the report
pub struct ValidateUseCase {
    validator: Box<dyn Validator + Send + Sync>,
    output: Box<dyn ReportOutputPort>,
}

impl ValidateUseCase {
    pub fn new(
        validator: Box<dyn Validator + Send + Sync>,
        output: Box<dyn ReportOutputPort>,
    ) -> Self {
        Self { validator, output }
    }

    /// Create a use case with the default validator
    pub fn with_default_validator(output: Box<dyn ReportOutputPort>) -> Self {
        Self {
            validator: Box::new(DefaultValidator::new()),
            output,
        }
    }

    pub async fn validate(&self, input: &ValidationInput) -> Result<ValidationReport> {
        let report = self.validator.validate(input);

        crate::observability::metrics::validation::rows_audited(report.total_rows);
        for issue in &report.issues {
            crate::observability::metrics::validation::issue_detected(issue.severity.as_str());
        }

        self.output
            .write_report(&report)
            .await
            .context("Failed to write validation report")?;

        info!(
            rows = report.total_rows,
            critical = report.count(Severity::Critical),
            major = report.count(Severity::Major),
            alignment_ok = report.column_alignment_ok,
            "Validation finished"
        );
        Ok(report)
    }
}
