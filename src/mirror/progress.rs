//! Progress publishing.
//!
//! The pipeline emits an immutable [`ProgressEvent`] after every per-item
//! decision and every status transition. Synchronous [`ProgressSink`]s are
//! called inline and must return quickly; everything else subscribes to the
//! broadcast channel and does its slow work on its own task.

use std::io::IsTerminal;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;

use super::state::{RunSnapshot, RunStatus};
use super::transfer::TransferOutcome;

/// Events buffered per subscriber before the slowest one starts lagging.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Started,
    ItemStarted,
    /// Bytes of the current item staged so far. Throttled by the transfer stage.
    ItemProgress { done: u64, total: u64 },
    ItemFinished(TransferOutcome),
    StopRequested,
    Finished(RunStatus),
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub snapshot: RunSnapshot,
}

/// Inline consumer of progress events.
///
/// Receives only the snapshot; must not call back into the controller.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

pub struct Publisher {
    tx: broadcast::Sender<ProgressEvent>,
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl Publisher {
    pub fn new(sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, sinks }
    }

    pub fn publish(&self, kind: ProgressKind, snapshot: RunSnapshot) {
        let event = ProgressEvent { kind, snapshot };
        for sink in &self.sinks {
            sink.on_event(&event);
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

/// Terminal progress bar for the item in flight: bytes staged against its size,
/// with the item ordinal as prefix and the filename as message.
pub struct BarRenderer {
    pb: ProgressBar,
}

impl BarRenderer {
    pub fn new(no_progress_bar: bool) -> Self {
        Self {
            pb: create_progress_bar(no_progress_bar),
        }
    }

    #[cfg(test)]
    pub fn bar(&self) -> &ProgressBar {
        &self.pb
    }
}

fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {prefix} {bar:30.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {wide_msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

impl ProgressSink for BarRenderer {
    fn on_event(&self, event: &ProgressEvent) {
        let snap = &event.snapshot;
        match event.kind {
            ProgressKind::Started => self.pb.set_message("listing"),
            ProgressKind::ItemStarted => {
                if let Some(item) = &snap.current_item {
                    self.pb.reset();
                    self.pb.set_length(item.size);
                    self.pb.set_prefix(format!("#{}", snap.items_seen + 1));
                    self.pb.set_message(item.filename.clone());
                }
            }
            ProgressKind::ItemProgress { done, .. } => self.pb.set_position(done),
            ProgressKind::ItemFinished(TransferOutcome::Failed) => {
                if let Some(err) = &snap.last_error {
                    self.pb.suspend(|| tracing::warn!("{}", err));
                }
            }
            ProgressKind::ItemFinished(TransferOutcome::SkippedExists) => {}
            ProgressKind::ItemFinished(_) => {
                if let Some(len) = self.pb.length() {
                    self.pb.set_position(len);
                }
            }
            ProgressKind::StopRequested => {
                self.pb
                    .suspend(|| tracing::info!("Stop requested, finishing current item..."));
            }
            ProgressKind::Finished(status) => {
                self.pb.set_prefix(format!("{} items", snap.items_seen));
                self.pb.finish_with_message(status.to_string());
            }
        }
    }
}
