use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::QuillConfig;

/// Build the default filter directive for a base level.
///
/// `verbose` turns on debug output for the merge crates regardless of level.
pub fn default_filter(level: &str, verbose: bool) -> String {
    if verbose {
        format!("{level},quill_app=debug,quill_docs=debug,quill_core=debug")
    } else {
        level.to_string()
    }
}

/// Initializes the logging system with file + console output.
/// Returns a guard that must be kept alive for the duration of the app.
///
/// `RUST_LOG` takes precedence over `filter` when set.
pub fn init_logging(filter: &str) -> Result<WorkerGuard> {
    let logs_dir = QuillConfig::logs_dir()?;
    std::fs::create_dir_all(&logs_dir)?;

    // File appender: daily rotation
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "quill");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

/// Initialize logging to a custom directory with a custom filter.
/// Useful for tests or embedded scenarios where `~/.quill/logs` is not desired.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "quill");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}
