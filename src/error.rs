use thiserror::Error;

/// Why a reply could not be turned into a structured payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureKind {
    /// No fenced block, no `[...]` and no `{...}` in the reply
    NoStructureFound,
    /// A candidate substring was found but is not valid JSON
    MalformedPayload,
    /// Valid JSON, but neither a record array nor an object carrying `rows`
    UnexpectedShape,
}

/// Why a decoded element could not become a canonical record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolationKind {
    NotAnObject,
    MissingType,
    UnsupportedValueType { field: String },
}

#[derive(Error, Debug)]
pub enum CanonError {
    #[error("could not recover a payload from the reply: {kind:?}")]
    ParseFailure { kind: ParseFailureKind, detail: String },

    #[error("record does not fit the canonical schema: {kind:?}")]
    SchemaViolation { kind: SchemaViolationKind },

    #[error("generation service failed transiently: {0}")]
    TransientService(String),

    #[error("generation service rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("generation request rejected: {0}")]
    Rejected(String),

    #[error("fallback produced no records for table {table_id}")]
    FallbackExhausted { table_id: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CanonError {
    pub fn parse(kind: ParseFailureKind, detail: impl Into<String>) -> Self {
        CanonError::ParseFailure { kind, detail: detail.into() }
    }

    pub fn schema(kind: SchemaViolationKind) -> Self {
        CanonError::SchemaViolation { kind }
    }

    /// Failures the orchestrator may retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CanonError::ParseFailure { .. }
                | CanonError::SchemaViolation { .. }
                | CanonError::TransientService(_)
                | CanonError::RateLimitExceeded(_)
        )
    }
}

/// Errors surfaced by the generation capability
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transient(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("generation service not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Transient(_)
                | GenerationError::RateLimited(_)
                | GenerationError::Timeout(_)
        )
    }
}

impl From<GenerationError> for CanonError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::RateLimited(msg) => CanonError::RateLimitExceeded(msg),
            other if other.is_retryable() => CanonError::TransientService(other.to_string()),
            other => CanonError::Rejected(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CanonError>;
