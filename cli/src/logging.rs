//! Tracing setup for `rbutils`.
//!
//! Warnings go to stderr (override with `RUST_LOG`). With `--log-file`, an
//! info-level copy is appended to the file through a non-blocking writer;
//! the returned guard must outlive every command so the writer is flushed.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_STDERR_LEVEL: &str = "warn";
const FILE_LEVEL: &str = "info";

pub fn init(log_file: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(DEFAULT_STDERR_LEVEL))
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_STDERR_LEVEL)),
        );

    let (file_layer, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(FILE_LEVEL));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Ok(guard)
}
