//! Line-oriented command console over the mirror controller.
//!
//! Commands are read from stdin while a run proceeds on its own task.
//! Terminal transitions are announced from a broadcast subscription, so the
//! announcer never calls back into the controller.

use std::fmt::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::format::{format_duration, format_size};
use crate::mirror::{MirrorController, ProgressKind, RunHandle, RunSnapshot, RunStatus};

const HELP: &str = "\
Commands:
  /mirror [channel]  start mirroring (defaults to the configured channel)
  /status            show progress of the current or last run
  /stop              stop after the item in flight
  /help              show this help
  /quit              stop any active run and exit";

#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Mirror(Option<String>),
    Status,
    Stop,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Err(String::new());
    };
    let arg = parts.next().map(str::to_string);
    match head {
        "/mirror" | "/start" => Ok(ConsoleCommand::Mirror(arg)),
        "/status" => Ok(ConsoleCommand::Status),
        "/stop" => Ok(ConsoleCommand::Stop),
        "/help" => Ok(ConsoleCommand::Help),
        "/quit" | "/exit" => Ok(ConsoleCommand::Quit),
        other => Err(format!("Unknown command {}. Type /help for commands.", other)),
    }
}

fn elapsed(snapshot: &RunSnapshot) -> Option<std::time::Duration> {
    let started = snapshot.started_at?;
    let finished = snapshot.finished_at.unwrap_or_else(chrono::Utc::now);
    (finished - started).to_std().ok()
}

/// Multi-line status report for a snapshot.
pub fn format_status(snapshot: &RunSnapshot) -> String {
    if snapshot.status == RunStatus::Idle {
        return "No mirror run yet.".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Status: {} ({})",
        snapshot.status,
        snapshot.channel.as_deref().unwrap_or("?")
    );
    let _ = writeln!(
        out,
        "Items seen: {}  downloaded: {}  skipped: {}  failed: {}",
        snapshot.items_seen, snapshot.downloaded, snapshot.skipped, snapshot.failed
    );
    let _ = write!(out, "Transferred: {}", format_size(snapshot.total_bytes));
    if let Some(d) = elapsed(snapshot) {
        let _ = write!(out, " in {}", format_duration(d));
    }
    if let Some(item) = &snapshot.current_item {
        let _ = write!(
            out,
            "\nCurrent: {} ({} of {}",
            item.filename,
            format_size(snapshot.current_bytes),
            format_size(item.size)
        );
        if item.size > 0 {
            let _ = write!(out, ", {}%", snapshot.current_bytes * 100 / item.size);
        }
        out.push(')');
    }
    if let Some(err) = &snapshot.last_error {
        let _ = write!(out, "\nLast error: {}", err);
    }
    out
}

/// Final report printed once a run has ended.
pub fn format_summary(snapshot: &RunSnapshot) -> String {
    let mut out = format!("── Mirror {} ──\n", snapshot.status);
    let _ = writeln!(out, "  Downloaded: {}", snapshot.downloaded);
    let _ = writeln!(out, "  Skipped:    {}", snapshot.skipped);
    let _ = writeln!(out, "  Failed:     {}", snapshot.failed);
    let _ = write!(out, "  Total size: {}", format_size(snapshot.total_bytes));
    if let Some(d) = elapsed(snapshot) {
        let _ = write!(out, "\n  Elapsed:    {}", format_duration(d));
    }
    if let Some(err) = &snapshot.last_error {
        let _ = write!(out, "\n  Last error: {}", err);
    }
    out
}

/// Run the console until `/quit` or end of input.
pub async fn run(controller: MirrorController, config: Config) -> anyhow::Result<()> {
    let mut events = controller.subscribe();
    let announcer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let ProgressKind::Finished(status) = event.kind {
                        if status.is_terminal() {
                            println!("{}", format_summary(&event.snapshot));
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::debug!("Console skipped {} progress events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut handle: Option<RunHandle> = None;

    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(msg) => {
                if !msg.is_empty() {
                    println!("{}", msg);
                }
                continue;
            }
        };
        match command {
            ConsoleCommand::Mirror(channel) => {
                let started = config
                    .mirror_request(channel.as_deref())
                    .and_then(|request| controller.start(request));
                match started {
                    Ok(h) => {
                        println!("Mirror started (run {})", h.run_id);
                        handle = Some(h);
                    }
                    Err(e) => println!("{}", e),
                }
            }
            ConsoleCommand::Status => println!("{}", format_status(&controller.status())),
            ConsoleCommand::Stop => match controller.request_stop() {
                Ok(()) => println!("Stopping after the current item..."),
                Err(e) => println!("{}", e),
            },
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => break,
        }
    }

    if controller.status().status.is_active() {
        let _ = controller.request_stop();
        println!("Waiting for the current item to finish...");
    }
    if let Some(h) = handle {
        h.wait().await?;
    }
    announcer.abort();
    Ok(())
}
