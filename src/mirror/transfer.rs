//! Transfer stage: download → commit → verify → discard staging, for one item.
//!
//! Local disk is the scarce resource, so the staging file is removed on
//! every exit path. A destination object whose committed size disagrees
//! with the item's size is purged so a later run re-attempts it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::destination::{local, DeleteOutcome, DestinationStore, StoreError};
use crate::retry::{self, RetryAction, RetryConfig};
use crate::source::{ItemSource, MediaItem, SourceError};

/// Suffix of staging files; anything carrying it in the staging directory is ours.
pub const STAGING_SUFFIX: &str = ".part";

/// Minimum gap between two byte-progress reports for the same item.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    Downloaded,
    SkippedExists,
    Failed,
    RetriedThenSucceeded,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TransferOutcome::Downloaded | TransferOutcome::RetriedThenSucceeded
        )
    }
}

/// What happened to one item during a run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub item: MediaItem,
    pub outcome: TransferOutcome,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl TransferRecord {
    pub fn skipped(item: &MediaItem) -> Self {
        Self {
            item: item.clone(),
            outcome: TransferOutcome::SkippedExists,
            bytes_transferred: 0,
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    pub fn failed(item: &MediaItem, elapsed: Duration, error: String) -> Self {
        Self {
            item: item.clone(),
            outcome: TransferOutcome::Failed,
            bytes_transferred: 0,
            elapsed,
            error: Some(error),
        }
    }
}

/// Per-item terminal failure. The run carries on with the next item.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Download of {filename} failed: {reason}")]
    Download { filename: String, reason: String },

    #[error("Upload of {filename} failed: {source}")]
    Upload {
        filename: String,
        #[source]
        source: StoreError,
    },

    #[error("Verification of {filename} failed: expected {expected} bytes, destination committed {actual}")]
    SizeMismatch {
        filename: String,
        expected: u64,
        actual: u64,
    },
}

/// Failure of a single staging attempt.
#[derive(Debug, Error)]
enum StageError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Staging disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("Content ended after {actual} of {expected} bytes")]
    Truncated { expected: u64, actual: u64 },

    #[error("Content exceeds declared size of {expected} bytes")]
    Oversized { expected: u64 },
}

impl StageError {
    fn retry_action(&self) -> RetryAction {
        match self {
            StageError::Source(e) => e.retry_action(),
            // A short body is almost always a dropped connection.
            StageError::Truncated { .. } => RetryAction::Retry,
            StageError::Disk(_) | StageError::Oversized { .. } => RetryAction::Abort,
        }
    }
}

pub struct TransferStage {
    source: Arc<dyn ItemSource>,
    store: Arc<dyn DestinationStore>,
    staging_dir: PathBuf,
    retry: RetryConfig,
}

impl TransferStage {
    pub fn new(
        source: Arc<dyn ItemSource>,
        store: Arc<dyn DestinationStore>,
        staging_dir: PathBuf,
        retry: RetryConfig,
    ) -> Self {
        Self {
            source,
            store,
            staging_dir,
            retry,
        }
    }

    /// Staging location for an item. Keyed by id so names from the feed
    /// never touch the local filesystem.
    pub fn staging_path(&self, item: &MediaItem) -> PathBuf {
        self.staging_dir.join(format!("{}{}", item.id, STAGING_SUFFIX))
    }

    /// Move one item into the destination. Never returns an error: failures
    /// are reported in the record.
    ///
    /// `on_bytes` receives the bytes staged so far, at most every
    /// [`PROGRESS_INTERVAL`] plus once when the body is complete. A retried
    /// download starts counting from zero again.
    pub async fn transfer(
        &self,
        item: &MediaItem,
        on_bytes: &(dyn Fn(u64) + Sync),
    ) -> TransferRecord {
        let started = Instant::now();
        let staging = self.staging_path(item);

        let result = self.run_steps(item, &staging, on_bytes).await;
        discard_staging(&staging).await;

        match result {
            Ok((bytes, retried)) => TransferRecord {
                item: item.clone(),
                outcome: if retried {
                    TransferOutcome::RetriedThenSucceeded
                } else {
                    TransferOutcome::Downloaded
                },
                bytes_transferred: bytes,
                elapsed: started.elapsed(),
                error: None,
            },
            Err(e) => TransferRecord::failed(item, started.elapsed(), e.to_string()),
        }
    }

    async fn run_steps(
        &self,
        item: &MediaItem,
        staging: &Path,
        on_bytes: &(dyn Fn(u64) + Sync),
    ) -> Result<(u64, bool), TransferError> {
        tracing::debug!(
            item_id = item.id,
            size_bytes = item.size,
            path = %staging.display(),
            "staging",
        );
        let staged = retry::retry_with_backoff(&self.retry, StageError::retry_action, move || {
            self.stage(item, staging, on_bytes)
        })
        .await
        .map_err(|e| TransferError::Download {
            filename: item.filename.clone(),
            reason: e.to_string(),
        })?;

        let store = &self.store;
        let committed = retry::retry_with_backoff(
            &self.retry,
            |e: &StoreError| e.retry_action(),
            move || store.write(&item.filename, staging),
        )
        .await
        .map_err(|source| TransferError::Upload {
            filename: item.filename.clone(),
            source,
        })?;

        if committed.value != item.size {
            self.purge(item).await;
            return Err(TransferError::SizeMismatch {
                filename: item.filename.clone(),
                expected: item.size,
                actual: committed.value,
            });
        }

        Ok((committed.value, staged.was_retried() || committed.was_retried()))
    }

    /// Stream the item's content into `staging`, enforcing the declared size.
    /// Each attempt truncates whatever an earlier attempt left behind.
    async fn stage(
        &self,
        item: &MediaItem,
        staging: &Path,
        on_bytes: &(dyn Fn(u64) + Sync),
    ) -> Result<u64, StageError> {
        let mut stream = self.source.download(item).await?;
        let mut file = fs::File::create(staging).await?;
        let mut written: u64 = 0;
        let mut last_report = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > item.size {
                return Err(StageError::Oversized {
                    expected: item.size,
                });
            }
            file.write_all(&chunk).await?;
            if written == item.size || last_report.elapsed() >= PROGRESS_INTERVAL {
                on_bytes(written);
                last_report = Instant::now();
            }
        }
        file.flush().await?;

        if written != item.size {
            return Err(StageError::Truncated {
                expected: item.size,
                actual: written,
            });
        }
        Ok(written)
    }

    /// Remove a corrupt destination object so it is not mistaken for a resume hit.
    async fn purge(&self, item: &MediaItem) {
        let store = &self.store;
        let result = retry::retry_with_backoff(
            &self.retry,
            |e: &StoreError| e.retry_action(),
            move || store.delete(&item.filename),
        )
        .await;
        match result {
            Ok(g) if g.value == DeleteOutcome::Deleted => {
                tracing::warn!(filename = %item.filename, "Purged size-mismatched destination object");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    filename = %item.filename,
                    "Could not purge size-mismatched destination object: {}",
                    e
                );
            }
        }
    }
}

async fn discard_staging(path: &Path) {
    if let Err(e) = local::remove_if_present(path).await {
        tracing::warn!("Could not remove staging file {}: {}", path.display(), e);
    }
}

/// Delete leftover staging files from an interrupted process.
pub async fn clear_stale_staging(staging_dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut entries = fs::read_dir(staging_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_part = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.ends_with(STAGING_SUFFIX));
        if is_part && entry.file_type().await?.is_file() {
            fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}
