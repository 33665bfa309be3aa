//! Logging setup for the shift-tracker binary.
//!
//! Everything goes to stderr through an `EnvFilter`. Lifecycle entries are
//! also appended to a daily log under `~/.shift-tracker/logs/` so incidents
//! can be reconstructed after the fact.

use shift_tracker::diagnostics::LIFECYCLE_TARGET;
use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEBUG_ENV: &str = "SHIFT_TRACKER_DEBUG_LOG";

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init() -> Option<WorkerGuard> {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_filter(filter);

    let (file_layer, guard) = match lifecycle_log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lifecycle.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter_fn(|metadata| metadata.target() == LIFECYCLE_TARGET));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn lifecycle_log_dir() -> Option<PathBuf> {
    let dir = dirs::home_dir()?.join(".shift-tracker").join("logs");
    fs_err::create_dir_all(&dir).ok()?;
    Some(dir)
}
