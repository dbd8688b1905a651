//! Control surface: start, status, stop.
//!
//! The controller is cheap to clone and safe to call from any task while a
//! run is in progress. Status queries only take the state lock, which the
//! pipeline never holds across an await.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::pipeline;
use super::progress::{ProgressEvent, ProgressKind, ProgressSink, Publisher};
use super::state::{RunSnapshot, RunState, RunStatus};
use super::transfer::TransferRecord;
use crate::destination::StoreProvider;
use crate::retry::RetryConfig;
use crate::source::ItemSource;
use crate::types::Direction;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("A mirror run is already active")]
    AlreadyRunning,

    #[error("No mirror run is active")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Immutable inputs of one run.
#[derive(Debug, Clone)]
pub struct MirrorRequest {
    pub channel: String,
    pub target_folder: String,
    pub direction: Direction,
    pub staging_dir: PathBuf,
    pub page_size: usize,
    pub retry: RetryConfig,
    /// Free-space floor in bytes below which pre-flight warns. 0 disables the check.
    pub min_free_space: u64,
}

impl MirrorRequest {
    /// Check required fields and make sure the staging directory exists.
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.channel.trim().is_empty() {
            return Err(ControlError::InvalidConfig(
                "channel is required (set TELEGRAM_CHANNEL or pass --channel)".into(),
            ));
        }
        let folder = self.target_folder.trim();
        if folder.is_empty() || folder == "." || folder == ".." || folder.contains(['/', '\\']) {
            return Err(ControlError::InvalidConfig(format!(
                "target folder {:?} must be a single non-empty folder name",
                self.target_folder
            )));
        }
        if self.page_size == 0 {
            return Err(ControlError::InvalidConfig(
                "page size must be at least 1".into(),
            ));
        }
        std::fs::create_dir_all(&self.staging_dir).map_err(|e| {
            ControlError::InvalidConfig(format!(
                "staging directory {} cannot be created: {}",
                self.staging_dir.display(),
                e
            ))
        })?;
        Ok(())
    }
}

pub(super) struct Inner {
    state: Mutex<RunState>,
    pub(super) publisher: Publisher,
    pub(super) source: Arc<dyn ItemSource>,
    stores: Arc<dyn StoreProvider>,
}

impl Inner {
    /// Poisoning only means a consumer panicked mid-read; the state itself is
    /// updated in single calls and stays consistent.
    pub(super) fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` under the lock, then publish the resulting snapshot with the
    /// lock released.
    pub(super) fn update_and_publish<F>(&self, kind: ProgressKind, f: F) -> RunSnapshot
    where
        F: FnOnce(&mut RunState),
    {
        let snapshot = {
            let mut state = self.lock();
            f(&mut state);
            state.snapshot()
        };
        self.publisher.publish(kind, snapshot.clone());
        snapshot
    }
}

/// A started run. Dropping it does not stop the run.
pub struct RunHandle {
    pub run_id: String,
    join: JoinHandle<RunSnapshot>,
}

impl RunHandle {
    /// Wait for the run to reach a terminal state and return its final snapshot.
    pub async fn wait(self) -> anyhow::Result<RunSnapshot> {
        Ok(self.join.await?)
    }
}

#[derive(Clone)]
pub struct MirrorController {
    inner: Arc<Inner>,
}

impl MirrorController {
    pub fn new(
        source: Arc<dyn ItemSource>,
        stores: Arc<dyn StoreProvider>,
        sinks: Vec<Arc<dyn ProgressSink>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RunState::default()),
                publisher: Publisher::new(sinks),
                source,
                stores,
            }),
        }
    }

    /// Start a run on a spawned task. Fails fast if one is already active.
    pub fn start(&self, request: MirrorRequest) -> Result<RunHandle, ControlError> {
        if self.inner.lock().status().is_active() {
            return Err(ControlError::AlreadyRunning);
        }
        request.validate()?;
        let store = self
            .inner
            .stores
            .open(&request.target_folder)
            .map_err(|e| ControlError::InvalidConfig(e.to_string()))?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let snapshot = {
            let mut state = self.inner.lock();
            // Re-check: another caller may have started while the store was opening.
            if state.status().is_active() {
                return Err(ControlError::AlreadyRunning);
            }
            state.begin(
                run_id.clone(),
                &request.channel,
                &request.target_folder,
                request.direction,
            );
            state.snapshot()
        };
        self.inner.publisher.publish(ProgressKind::Started, snapshot);

        tracing::info!(
            run_id = %run_id,
            channel = %request.channel,
            target = %store.describe(),
            direction = %request.direction,
            "Mirror run started"
        );

        let inner = self.inner.clone();
        let join = tokio::spawn(pipeline::run(inner, request, store));
        Ok(RunHandle { run_id, join })
    }

    pub fn status(&self) -> RunSnapshot {
        self.inner.lock().snapshot()
    }

    /// Ask the active run to stop after the in-flight item.
    pub fn request_stop(&self) -> Result<(), ControlError> {
        let snapshot = {
            let mut state = self.inner.lock();
            match state.status() {
                RunStatus::Stopping => return Ok(()),
                RunStatus::Running => {
                    state.request_cancel();
                    state.snapshot()
                }
                _ => return Err(ControlError::NotRunning),
            }
        };
        self.inner
            .publisher
            .publish(ProgressKind::StopRequested, snapshot);
        Ok(())
    }

    /// Transfer log of the latest run.
    pub fn records(&self) -> Vec<TransferRecord> {
        self.inner.lock().records().to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.publisher.subscribe()
    }
}
