//! Logging Module
//!
//! Console plus daily rolling file output.

use tracing_subscriber::{fmt, EnvFilter, prelude::*};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use std::path::PathBuf;

use crate::storage::APP_DIR_NAME;

/// Initialize logging; `verbose` raises the default level to debug
pub fn init(verbose: bool) {
    let log_dir = log_directory();
    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "findmy-tracker.log");

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_appender);

    // Pretty output in debug builds, compact otherwise; always on stderr.
    #[cfg(debug_assertions)]
    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stderr).pretty().boxed();

    #[cfg(not(debug_assertions))]
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr).compact().boxed();

    let default_level = if verbose || cfg!(debug_assertions) { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", default_level)));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join("logs")
}
