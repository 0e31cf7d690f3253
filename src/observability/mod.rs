// Observability: metrics helpers. Logging setup lives in crate::logging.

pub mod metrics;
