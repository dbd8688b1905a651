//! Tracing setup.
//!
//! The terminal gets the level chosen on the command line (or `RUST_LOG`).
//! Unless disabled, this crate's debug output is also appended to a log file
//! so a failed overnight run can be diagnosed afterwards.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::cli::Cli;
use crate::config::expand_tilde;

/// This crate at debug, dependencies at warn.
fn file_filter() -> EnvFilter {
    EnvFilter::new(format!("warn,{}=debug", env!("CARGO_CRATE_NAME")))
}

/// Directory to create and file name to append to.
fn split_log_path(path: &Path) -> Option<(PathBuf, PathBuf)> {
    let file_name = path.file_name()?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, PathBuf::from(file_name)))
}

/// Open `path` for appending, creating its directory. Never rotated.
fn open_log_file(path: &Path) -> anyhow::Result<RollingFileAppender> {
    let (dir, file_name) = split_log_path(path)
        .with_context(|| format!("{} is not a file path", path.display()))?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Cannot create log directory {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(&dir)
        .with_context(|| format!("Cannot open log file {}", path.display()))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive until exit.
pub fn init(cli: &Cli) -> Option<WorkerGuard> {
    let terminal_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter()));
    let terminal = fmt::layer().with_filter(terminal_filter);

    let log_path = expand_tilde(&cli.log_file);
    let mut file_error = None;
    let mut guard = None;
    let file = if cli.no_file_log {
        None
    } else {
        match open_log_file(&log_path) {
            Ok(appender) => {
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard = Some(worker);
                Some(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_filter(file_filter()),
                )
            }
            Err(e) => {
                file_error = Some(e);
                None
            }
        }
    };

    tracing_subscriber::registry().with(terminal).with(file).init();

    match file_error {
        Some(e) => tracing::warn!("File logging disabled: {:#}", e),
        None if guard.is_some() => tracing::debug!("Appending debug log to {}", log_path.display()),
        None => {}
    }
    guard
}
