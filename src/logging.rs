//! Tracing subscriber setup: a terse console layer plus an append-only log file.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Console level from the `-v` / `-q` flags.
pub fn console_level(verbose: bool, quiet: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else if quiet {
        Level::ERROR
    } else {
        Level::INFO
    }
}

/// Open (creating parents) the log file in append mode.
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {:?}", path))
}

/// Install the global subscriber.
///
/// The file layer records INFO and above (DEBUG with `-v`) regardless of
/// `-q`. When the file cannot be opened only the console layer is used.
pub fn init(level: Level, log_file: Option<&Path>) -> Result<()> {
    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::from_level(level));

    let file_level = if level == Level::DEBUG {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let mut open_error = None;
    let file_layer = match log_file.map(open_log_file) {
        Some(Ok(file)) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Arc::new(file))
                .with_filter(LevelFilter::from_level(file_level)),
        ),
        Some(Err(e)) => {
            open_error = Some(e);
            None
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(e) = open_error {
        tracing::debug!("File logging disabled: {:#}", e);
    }

    Ok(())
}
