use std::path::Path;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    prelude::*,
    EnvFilter,
};

/// Initialize logging for a standalone server process: a dedicated log
/// file (truncated on each start) plus stderr console output.
pub fn init_logging(log_path: impl AsRef<Path>) -> anyhow::Result<()> {
    let log_path = log_path.as_ref();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Truncate on start so one run maps to one file.
    let log_file = std::fs::File::create(log_path)?;
    let (file_writer, guard) = tracing_appender::non_blocking(log_file);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scribe=debug,tower_http=debug,axum=info,warn"));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // The writer guard must outlive the process.
    std::mem::forget(guard);

    tracing::info!(log_file = %log_path.display(), "logging initialized");
    Ok(())
}

/// Console-only logging for tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scribe=trace,debug")),
        )
        .try_init();
}
