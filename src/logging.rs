use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_NAME: &str = "table_canon.log";
const DEFAULT_DIRECTIVES: &str = "warn,table_canon=info";

/// Initializes the logging system with both console and file output.
///
/// The file layer writes JSON lines to a daily-rotated file under `log_dir`; the console
/// layer writes human-readable lines to stderr so stdout stays free for the run summary.
/// `RUST_LOG` overrides the default filter. Keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    // Console-only when the log directory can't be created
    let (file_layer, guard, dir_error) = match fs::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer().json().with_writer(non_blocking_writer);
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    if let Some(e) = dir_error {
        tracing::warn!("Could not create log directory {}: {}", log_dir.display(), e);
    }

    guard
}
