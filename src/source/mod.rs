//! Item Source boundary: the upstream feed that yields media descriptors.
//!
//! The core never speaks the feed's wire protocol directly. It pulls
//! ordered batches of [`MediaItem`]s through [`ItemSource`] and streams
//! content for one item at a time.

pub mod error;
pub mod filename;
pub mod http;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::Serialize;

pub use error::SourceError;
pub use http::HttpFeedSource;

use crate::types::Direction;

/// Ordering key of an item within its channel (the message id).
pub type ItemId = i64;

/// Streamed content of one item.
pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// Opaque reference the source uses to fetch an item's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentHandle(pub String);

/// One media attachment, immutable once produced by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaItem {
    pub id: ItemId,
    pub filename: String,
    pub size: u64,
    #[serde(skip)]
    pub content: ContentHandle,
}

/// One page of items in enumeration order.
#[derive(Debug, Default)]
pub struct Batch {
    pub items: Vec<MediaItem>,
    pub has_more: bool,
}

/// Upstream feed capability.
///
/// `next_batch` must be restartable from any key: passing the id of the
/// last item seen returns the items that follow it in `direction` order.
/// Items without a verifiable file attachment are never yielded.
#[async_trait::async_trait]
pub trait ItemSource: Send + Sync {
    async fn next_batch(
        &self,
        channel: &str,
        after: Option<ItemId>,
        direction: Direction,
        limit: usize,
    ) -> Result<Batch, SourceError>;

    /// Open a byte stream over the item's content.
    async fn download(&self, item: &MediaItem) -> Result<ByteStream, SourceError>;
}
