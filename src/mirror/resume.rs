//! Resume filter: the destination itself is the record of what is done.

use std::sync::Arc;

use crate::destination::{DestinationStore, StoreError};
use crate::retry::{self, RetryConfig};
use crate::source::MediaItem;

pub struct ResumeFilter {
    store: Arc<dyn DestinationStore>,
    retry: RetryConfig,
}

impl ResumeFilter {
    pub fn new(store: Arc<dyn DestinationStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// True when an object named exactly like the item is already committed.
    ///
    /// Only the name is compared. A size-mismatched object never survives a
    /// transfer, so presence implies a verified copy.
    pub async fn should_skip(&self, item: &MediaItem) -> Result<bool, StoreError> {
        let store = &self.store;
        let name = item.filename.as_str();
        let guarded = retry::retry_with_backoff(
            &self.retry,
            |e: &StoreError| e.retry_action(),
            move || store.exists(name),
        )
        .await?;
        Ok(guarded.value)
    }
}
