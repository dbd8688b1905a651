//! HTTP feed adapter for [`ItemSource`].
//!
//! Talks to a channel-export service exposing
//! `GET {base}/channels/{channel}/media` pages and plain content URLs.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use super::filename::{media_filename, MediaKind};
use super::{Batch, ByteStream, ContentHandle, ItemId, ItemSource, MediaItem, SourceError};
use crate::types::Direction;

/// Wait applied when a 429 carries no usable `Retry-After`.
const DEFAULT_RATE_LIMIT_SECS: u64 = 1;

/// Longest silence tolerated between two reads before a request is abandoned.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct FeedPage {
    messages: Vec<FeedMessage>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct FeedMessage {
    id: ItemId,
    #[serde(default)]
    media: Option<FeedMedia>,
}

#[derive(Debug, Deserialize)]
struct FeedMedia {
    kind: MediaKind,
    id: i64,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct FeedErrorBody {
    error: String,
}

impl FeedPage {
    /// Keep only messages with a verifiable attachment.
    fn into_batch(self) -> Batch {
        let items = self
            .messages
            .into_iter()
            .filter_map(|msg| {
                let media = msg.media?;
                let Some(size) = media.size else {
                    tracing::debug!(item_id = msg.id, "Skipping media with unknown size");
                    return None;
                };
                Some(MediaItem {
                    id: msg.id,
                    filename: media_filename(
                        media.kind,
                        media.id,
                        media.file_name.as_deref(),
                        media.mime_type.as_deref(),
                    ),
                    size,
                    content: ContentHandle(media.url),
                })
            })
            .collect();
        Batch {
            items,
            has_more: self.has_more,
        }
    }
}

/// Parse a `FLOOD_WAIT_<n>` error code into a wait in seconds.
fn parse_flood_wait(code: &str) -> Option<u64> {
    code.strip_prefix("FLOOD_WAIT_")?.parse().ok()
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Map a non-success response onto the source error taxonomy.
fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> SourceError {
    let flood = serde_json::from_str::<FeedErrorBody>(body)
        .ok()
        .and_then(|b| parse_flood_wait(&b.error));
    if let Some(secs) = flood {
        return SourceError::RateLimited(secs);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return SourceError::RateLimited(retry_after_secs(headers).unwrap_or(DEFAULT_RATE_LIMIT_SECS));
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return SourceError::Transport(format!("HTTP {}", status.as_u16()));
    }
    SourceError::Unavailable(format!("HTTP {}: {}", status.as_u16(), body.trim()))
}

/// Feed client. Credentials are owned by this value, never process-global.
pub struct HttpFeedSource {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl std::fmt::Debug for HttpFeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFeedSource")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpFeedSource {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, SourceError> {
        Self::with_read_timeout(base_url, token, READ_TIMEOUT)
    }

    /// A stalled body fails with [`SourceError::Transport`] once `read_timeout`
    /// passes without data, so the guard can retry it.
    fn with_read_timeout(
        base_url: &str,
        token: Option<String>,
        read_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SourceError::Unavailable(format!("Invalid feed URL {:?}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::Unavailable(format!(
                "Feed URL {} cannot carry a path",
                base_url
            )));
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("Cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// `{base}/channels/{channel}/media`, with the channel encoded as a single segment.
    fn media_url(&self, channel: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["channels", channel, "media"]);
        }
        url
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, SourceError> {
        let builder = match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &headers, &body))
    }
}

#[async_trait::async_trait]
impl ItemSource for HttpFeedSource {
    async fn next_batch(
        &self,
        channel: &str,
        after: Option<ItemId>,
        direction: Direction,
        limit: usize,
    ) -> Result<Batch, SourceError> {
        let url = self.media_url(channel);
        let mut query: Vec<(&str, String)> = vec![
            ("direction", direction.as_query().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        tracing::debug!(%url, ?after, %direction, limit, "Fetching feed page");

        let response = self.send(self.client.get(url).query(&query)).await?;
        let page: FeedPage = response.json().await?;
        Ok(page.into_batch())
    }

    async fn download(&self, item: &MediaItem) -> Result<ByteStream, SourceError> {
        let response = self.send(self.client.get(&item.content.0)).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SourceError::from));
        Ok(stream.boxed())
    }
}
