use std::path::{Path, PathBuf};

use crate::cli::{FeedArgs, MirrorArgs};
use crate::mirror::{ControlError, MirrorRequest};
use crate::retry::RetryConfig;
use crate::source::filename::clean_channel_ref;
use crate::types::Direction;

/// Upper bound on a single transient-retry backoff.
const MAX_RETRY_DELAY_SECS: u64 = 60;

const MIB: u64 = 1024 * 1024;

/// Resolved settings for `mirror` and `console`.
///
/// Built once from CLI flags and environment; runs receive an immutable
/// [`MirrorRequest`] derived from it.
pub struct Config {
    pub channel: Option<String>,
    pub target_folder: String,
    pub drive_base_path: Option<PathBuf>,
    pub staging_dir: PathBuf,
    pub feed_url: String,
    pub feed_token: Option<String>,

    pub min_free_space: u64,
    pub page_size: usize,
    pub retry: RetryConfig,

    pub direction: Direction,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("channel", &self.channel)
            .field("target_folder", &self.target_folder)
            .field("drive_base_path", &self.drive_base_path)
            .field("staging_dir", &self.staging_dir)
            .field("feed_url", &self.feed_url)
            .field("feed_token", &self.feed_token.as_ref().map(|_| "<redacted>"))
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub(crate) fn retry_config(feed: &FeedArgs) -> RetryConfig {
    RetryConfig {
        max_retries: feed.max_retries,
        base_delay_secs: feed.retry_delay,
        max_delay_secs: MAX_RETRY_DELAY_SECS,
    }
}

impl Config {
    pub fn from_cli(args: MirrorArgs) -> Self {
        let direction = args
            .direction
            .unwrap_or_else(|| Direction::from_reverse_flag(args.reverse));
        let channel = args
            .channel
            .as_deref()
            .map(clean_channel_ref)
            .filter(|c| !c.is_empty());

        Self {
            channel,
            target_folder: args.target_folder.trim().to_string(),
            drive_base_path: args
                .drive_base_path
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .map(expand_tilde),
            staging_dir: expand_tilde(&args.staging_dir),
            retry: retry_config(&args.feed),
            feed_url: args.feed.feed_url,
            feed_token: args.feed.feed_token.filter(|t| !t.is_empty()),
            min_free_space: args.min_free_space.saturating_mul(MIB),
            page_size: args.page_size,
            direction,
            no_progress_bar: args.no_progress_bar,
        }
    }

    /// Destination base path, which must name an existing directory.
    pub fn drive_base_path(&self) -> Result<&Path, ControlError> {
        let base = self.drive_base_path.as_deref().ok_or_else(|| {
            ControlError::InvalidConfig(
                "destination base path is required (set DRIVE_BASE_PATH or pass --drive-base-path)"
                    .into(),
            )
        })?;
        if !base.is_dir() {
            return Err(ControlError::InvalidConfig(format!(
                "destination base path {} is not a directory",
                base.display()
            )));
        }
        Ok(base)
    }

    /// Build the inputs of one run. `channel` overrides the configured channel.
    pub fn mirror_request(&self, channel: Option<&str>) -> Result<MirrorRequest, ControlError> {
        let channel = channel
            .map(clean_channel_ref)
            .filter(|c| !c.is_empty())
            .or_else(|| self.channel.clone())
            .ok_or_else(|| {
                ControlError::InvalidConfig(
                    "channel is required (set TELEGRAM_CHANNEL or pass --channel)".into(),
                )
            })?;

        let request = MirrorRequest {
            channel,
            target_folder: self.target_folder.clone(),
            direction: self.direction,
            staging_dir: self.staging_dir.clone(),
            page_size: self.page_size,
            retry: self.retry,
            min_free_space: self.min_free_space,
        };
        request.validate()?;
        Ok(request)
    }
}
