//! tgmirror-rs: mirror a channel's media attachments into a destination folder.
//!
//! Items are pulled from a channel feed, skipped when a file of the same name
//! already exists at the destination, and otherwise staged locally, committed,
//! size-verified and removed from staging one at a time. Upstream rate-limit
//! waits are honoured exactly; a stop request takes effect between items.

#![warn(clippy::all)]

mod cli;
mod config;
mod console;
mod destination;
mod format;
mod logging;
mod mirror;
mod retry;
mod shutdown;
mod source;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use cli::Command;
use config::Config;
use destination::LocalFsProvider;
use mirror::{BarRenderer, MirrorController, ProgressSink, RunStatus, TransferOutcome};
use source::filename::clean_channel_ref;
use source::{HttpFeedSource, ItemSource, SourceError};

/// Largest page requested by `list`.
const LIST_PAGE_SIZE: usize = 100;

/// Find `--env-file` before clap runs, so `.env` values can feed `env = ...` options.
fn env_file_arg(args: &[String]) -> Option<&str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--env-file=") {
            return Some(value);
        }
        if arg == "--env-file" {
            return iter.next().map(String::as_str);
        }
    }
    None
}

/// Load the environment file. Existing variables are never overridden.
fn load_env_file() -> Result<Option<PathBuf>, (PathBuf, dotenvy::Error)> {
    let args: Vec<String> = std::env::args().collect();
    let explicit = env_file_arg(&args);
    let path = config::expand_tilde(explicit.unwrap_or(".env"));
    match dotenvy::from_path(&path) {
        Ok(()) => Ok(Some(path)),
        Err(e) if e.not_found() && explicit.is_none() => Ok(None),
        Err(e) => Err((path, e)),
    }
}

fn build_controller(
    config: &Config,
    sinks: Vec<Arc<dyn ProgressSink>>,
) -> anyhow::Result<MirrorController> {
    let source = HttpFeedSource::new(&config.feed_url, config.feed_token.clone())?;
    let provider = LocalFsProvider::new(config.drive_base_path()?);
    Ok(MirrorController::new(
        Arc::new(source),
        Arc::new(provider),
        sinks,
    ))
}

/// Run the mirror command: one run, summary, exit status.
async fn run_mirror(args: cli::MirrorArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(args);
    tracing::debug!(?config, "Resolved configuration");

    let request = config.mirror_request(None)?;
    let renderer: Arc<dyn ProgressSink> = Arc::new(BarRenderer::new(config.no_progress_bar));
    let controller = build_controller(&config, vec![renderer])?;

    let shutdown_token = shutdown::install_signal_handler()?;
    shutdown::forward_to_controller(shutdown_token, controller.clone());

    let handle = controller.start(request)?;
    let snapshot = handle.wait().await?;

    println!("{}", console::format_summary(&snapshot));
    let records = controller.records();
    let failed: Vec<_> = records
        .iter()
        .filter(|r| r.outcome == TransferOutcome::Failed)
        .collect();
    if !failed.is_empty() {
        println!();
        println!("Failed items:");
        for record in failed {
            println!(
                "  {} ({}) - {}",
                record.item.filename,
                record.item.id,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    // Exit through main so the log writer guard is dropped.
    if snapshot.status == RunStatus::Failed {
        anyhow::bail!(
            "Mirror run failed: {}",
            snapshot.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Run the interactive command console.
async fn run_console(args: cli::MirrorArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(args);
    tracing::debug!(?config, "Resolved configuration");

    let controller = build_controller(&config, Vec::new())?;
    let shutdown_token = shutdown::install_signal_handler()?;
    shutdown::forward_to_controller(shutdown_token, controller.clone());

    console::run(controller, config).await
}

/// Run the list command.
async fn run_list(args: cli::ListArgs) -> anyhow::Result<()> {
    let source = HttpFeedSource::new(&args.feed.feed_url, args.feed.feed_token.clone())?;
    let retry_config = config::retry_config(&args.feed);
    let channel = clean_channel_ref(&args.channel);
    if channel.is_empty() {
        anyhow::bail!("Channel reference {:?} is empty", args.channel);
    }

    println!("Media in {} ({}):", channel, args.direction);
    let mut after = None;
    let mut printed = 0usize;
    let mut total_bytes = 0u64;
    while printed < args.limit {
        let limit = (args.limit - printed).min(LIST_PAGE_SIZE);
        let (source, channel, direction) = (&source, channel.as_str(), args.direction);
        let batch = retry::retry_with_backoff(&retry_config, SourceError::retry_action, move || {
            source.next_batch(channel, after, direction, limit)
        })
        .await?
        .value;

        for item in batch.items.iter().take(args.limit - printed) {
            println!(
                "  {:>12}  {:>10}  {}",
                item.id,
                format::format_size(item.size),
                item.filename
            );
            total_bytes += item.size;
            printed += 1;
            after = Some(item.id);
        }
        if !batch.has_more || batch.items.is_empty() {
            break;
        }
    }

    println!();
    println!("{} item(s), {}", printed, format::format_size(total_bytes));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_env_file();
    let cli = cli::Cli::parse();

    let _log_guard = logging::init(&cli);

    match env_file {
        Ok(Some(path)) => tracing::debug!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err((path, e)) => tracing::warn!("Could not load {}: {}", path.display(), e),
    }

    match cli.command {
        Command::Mirror(args) => run_mirror(args).await,
        Command::Console(args) => run_console(args).await,
        Command::List(args) => run_list(args).await,
    }
}
