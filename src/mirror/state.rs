//! Run state shared between the pipeline loop and the control surface.
//!
//! Always accessed through a mutex owned by the controller. Every mutation
//! is a single method call, so a snapshot taken under the lock is never torn.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::transfer::{TransferOutcome, TransferRecord};
use crate::source::MediaItem;
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    /// Stop requested; the in-flight item is still finishing.
    Stopping,
    Stopped,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Stopping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Stopped | RunStatus::Completed | RunStatus::Failed
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Stopping => "stopping",
            RunStatus::Stopped => "stopped",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Immutable copy of the run state handed to status queries and subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: Option<String>,
    pub status: RunStatus,
    pub channel: Option<String>,
    pub target_folder: Option<String>,
    pub direction: Option<Direction>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items_seen: u64,
    pub downloaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub total_bytes: u64,
    pub current_item: Option<MediaItem>,
    /// Bytes of `current_item` staged so far.
    pub current_bytes: u64,
    pub cancel_requested: bool,
    pub last_error: Option<String>,
}

impl RunSnapshot {
    fn idle() -> Self {
        Self {
            run_id: None,
            status: RunStatus::Idle,
            channel: None,
            target_folder: None,
            direction: None,
            started_at: None,
            finished_at: None,
            items_seen: 0,
            downloaded: 0,
            skipped: 0,
            failed: 0,
            total_bytes: 0,
            current_item: None,
            current_bytes: 0,
            cancel_requested: false,
            last_error: None,
        }
    }

    /// `downloaded + skipped + failed == items_seen` between items.
    pub fn is_balanced(&self) -> bool {
        self.downloaded + self.skipped + self.failed == self.items_seen
    }
}

#[derive(Debug)]
pub struct RunState {
    snapshot: RunSnapshot,
    records: Vec<TransferRecord>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            snapshot: RunSnapshot::idle(),
            records: Vec::new(),
        }
    }
}

impl RunState {
    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshot.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.snapshot.status
    }

    pub fn records(&self) -> &[TransferRecord] {
        &self.records
    }

    pub fn cancel_requested(&self) -> bool {
        self.snapshot.cancel_requested
    }

    /// Reset for a fresh run. The previous run's counters and log are dropped.
    pub fn begin(&mut self, run_id: String, channel: &str, target_folder: &str, direction: Direction) {
        self.snapshot = RunSnapshot {
            run_id: Some(run_id),
            status: RunStatus::Running,
            channel: Some(channel.to_string()),
            target_folder: Some(target_folder.to_string()),
            direction: Some(direction),
            started_at: Some(Utc::now()),
            ..RunSnapshot::idle()
        };
        self.records.clear();
    }

    pub fn set_current(&mut self, item: Option<MediaItem>) {
        self.snapshot.current_item = item;
        self.snapshot.current_bytes = 0;
    }

    pub fn set_current_bytes(&mut self, done: u64) {
        self.snapshot.current_bytes = done;
    }

    /// Count one finished item. Counters move together so the balance holds.
    pub fn record(&mut self, record: TransferRecord) {
        let s = &mut self.snapshot;
        s.items_seen += 1;
        match record.outcome {
            TransferOutcome::Downloaded | TransferOutcome::RetriedThenSucceeded => {
                s.downloaded += 1;
                s.total_bytes += record.bytes_transferred;
            }
            TransferOutcome::SkippedExists => s.skipped += 1,
            TransferOutcome::Failed => {
                s.failed += 1;
                if let Some(err) = &record.error {
                    s.last_error = Some(format!("{}: {}", record.item.filename, err));
                }
            }
        }
        s.current_item = None;
        s.current_bytes = 0;
        self.records.push(record);
    }

    /// Set the cancel flag. Returns false when no run is active.
    pub fn request_cancel(&mut self) -> bool {
        if !self.snapshot.status.is_active() {
            return false;
        }
        self.snapshot.cancel_requested = true;
        self.snapshot.status = RunStatus::Stopping;
        true
    }

    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        let s = &mut self.snapshot;
        s.status = status;
        s.finished_at = Some(Utc::now());
        s.current_item = None;
        s.current_bytes = 0;
        if error.is_some() {
            s.last_error = error;
        }
    }
}
