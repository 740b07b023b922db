//! Portway logging
//!
//! One-call tracing initialization: env-filtered stderr output, optionally
//! mirrored to a file when the relay's `log_to_file` setting is on.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,portway=debug"))
}

/// Initialize logging to stderr only.
pub fn init() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter())
        .init();
}

/// Initialize logging to stderr plus an append-mode log file.
///
/// Returns an IO error if the file cannot be opened; the caller decides
/// whether that is fatal.
pub fn init_with_file(path: &Path) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file)),
        )
        .with(env_filter())
        .init();
    Ok(())
}
