use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryAction;

/// Failures raised by an [`ItemSource`](super::ItemSource).
#[derive(Debug, Error)]
pub enum SourceError {
    /// Upstream asked us to wait; the value is authoritative.
    #[error("Rate limited by source, retry after {0}s")]
    RateLimited(u64),

    /// Connection reset, timeout, 5xx. Worth retrying a bounded number of times.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The source refused the request (unknown channel, auth rejected, ...).
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The source answered with something we could not interpret.
    #[error("Malformed source response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn retry_action(&self) -> RetryAction {
        match self {
            SourceError::RateLimited(secs) => RetryAction::WaitFor(Duration::from_secs(*secs)),
            SourceError::Transport(_) => RetryAction::Retry,
            SourceError::Unavailable(_) | SourceError::Malformed(_) => RetryAction::Abort,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Malformed(e.to_string())
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}
