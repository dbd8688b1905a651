use clap::{Args, Parser, Subcommand};

use crate::types::{Direction, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "tgmirror-rs",
    version,
    about = "Mirror channel media into a destination folder, one file at a time"
)]
pub struct Cli {
    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// File receiving this program's debug log, appended across runs
    #[arg(
        long,
        env = "MIRROR_LOG_FILE",
        default_value = "~/.tg_mirror/mirror.log",
        global = true
    )]
    pub log_file: String,

    /// Log to the terminal only
    #[arg(long, global = true)]
    pub no_file_log: bool,

    /// Environment file loaded before option parsing
    #[arg(long, default_value = ".env", global = true)]
    pub env_file: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mirror one channel, then exit
    Mirror(MirrorArgs),
    /// Read /mirror, /status, /stop commands from stdin
    Console(MirrorArgs),
    /// List a channel's media without downloading anything
    List(ListArgs),
}

/// Item source connection and retry tuning.
#[derive(Args, Debug, Clone)]
pub struct FeedArgs {
    /// Base URL of the channel feed service
    #[arg(long, env = "MIRROR_FEED_URL")]
    pub feed_url: String,

    /// Bearer token for the feed service
    #[arg(long, env = "MIRROR_FEED_TOKEN", hide_env_values = true)]
    pub feed_token: Option<String>,

    /// Max retries on transient failures (rate-limit waits are not counted)
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,

    /// Base backoff in seconds between transient retries
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,
}

#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// Channel to mirror: name, @name, t.me link or numeric id
    #[arg(short = 'c', long, env = "TELEGRAM_CHANNEL")]
    pub channel: Option<String>,

    /// Folder under the destination base path
    #[arg(long, env = "DRIVE_TARGET_FOLDER", default_value = "Telegram_Mirror")]
    pub target_folder: String,

    /// Destination base path (e.g. a mounted drive)
    #[arg(long, env = "DRIVE_BASE_PATH")]
    pub drive_base_path: Option<String>,

    /// Local staging directory; holds at most one file at a time
    #[arg(long, env = "TEMP_DOWNLOAD_DIR", default_value = "temp_downloads")]
    pub staging_dir: String,

    /// Enumerate oldest-first instead of newest-first
    #[arg(long, env = "DOWNLOAD_REVERSE")]
    pub reverse: bool,

    /// Enumeration order; overrides --reverse
    #[arg(long, value_enum)]
    pub direction: Option<Direction>,

    /// Items requested per listing call
    #[arg(long, default_value_t = 100)]
    pub page_size: usize,

    /// Warn when destination or staging free space is below this many MiB
    #[arg(long, default_value_t = 1024)]
    pub min_free_space: u64,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    #[command(flatten)]
    pub feed: FeedArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Channel to inspect
    #[arg(short = 'c', long, env = "TELEGRAM_CHANNEL")]
    pub channel: String,

    /// Maximum number of items to print
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Enumeration order
    #[arg(long, value_enum, default_value = "newest-first")]
    pub direction: Direction,

    #[command(flatten)]
    pub feed: FeedArgs,
}
