//! Destination Store boundary: durable, name-addressable storage.

pub mod local;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use local::{LocalFsProvider, LocalFsStore};

use crate::retry::RetryAction;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Destination rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Transient destination error: {0}")]
    Transient(String),

    #[error("Invalid object name {0:?}")]
    InvalidName(String),

    #[error("Destination unavailable: {0}")]
    Unavailable(String),

    #[error("Destination I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn retry_action(&self) -> RetryAction {
        use std::io::ErrorKind;
        match self {
            StoreError::RateLimited(secs) => RetryAction::WaitFor(Duration::from_secs(*secs)),
            StoreError::Transient(_) => RetryAction::Retry,
            // Network-mounted drives surface hiccups as these kinds.
            StoreError::Io(e) => match e.kind() {
                ErrorKind::Interrupted
                | ErrorKind::TimedOut
                | ErrorKind::WouldBlock
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe => RetryAction::Retry,
                _ => RetryAction::Abort,
            },
            StoreError::InvalidName(_) | StoreError::Unavailable(_) => RetryAction::Abort,
        }
    }
}

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Durable target storage for mirrored files.
///
/// Objects are addressed by the source filename, unmodified. A write either
/// commits the whole object under `name` or leaves nothing under that name.
#[async_trait::async_trait]
pub trait DestinationStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Commit the staged file under `name`, returning the committed size.
    async fn write(&self, name: &str, staged: &Path) -> Result<u64, StoreError>;

    async fn delete(&self, name: &str) -> Result<DeleteOutcome, StoreError>;

    async fn list_names(&self) -> Result<Vec<String>, StoreError>;

    /// Free bytes at the destination, if the backend can tell. Advisory only.
    async fn free_space(&self) -> Result<Option<u64>, StoreError>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

/// Opens the destination for a run's target folder.
pub trait StoreProvider: Send + Sync {
    fn open(&self, target_folder: &str) -> Result<Arc<dyn DestinationStore>, StoreError>;
}
