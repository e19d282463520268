// Logging module - Logging infrastructure
use crate::domain::error::{SercomError, SercomResult};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging system.
///
/// `RUST_LOG` wins over `level` when set. Logs go to stderr so received data
/// on stdout stays clean.
pub fn init_logging(level: &str, verbose: bool) -> SercomResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(level)))
        .map_err(|e| SercomError::Config {
            message: format!("Invalid log level '{}': {}", level, e),
        })?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(verbose)
                .with_level(true)
                .with_thread_ids(verbose)
                .with_file(verbose)
                .with_line_number(verbose),
        )
        .try_init()
        .map_err(|e| SercomError::Config {
            message: format!("Failed to initialize logging: {}", e),
        })?;

    tracing::debug!("Sercom logging system initialized");
    Ok(())
}

fn default_directive(level: &str) -> String {
    format!("sercom={},warn", level)
}
