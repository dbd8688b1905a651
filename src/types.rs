use serde::{Deserialize, Serialize};

/// Enumeration order of a channel's media.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    #[default]
    #[value(name = "newest-first")]
    NewestFirst,
    #[value(name = "oldest-first")]
    OldestFirst,
}

impl Direction {
    /// Query-string form understood by the feed API.
    pub fn as_query(&self) -> &'static str {
        match self {
            Direction::NewestFirst => "desc",
            Direction::OldestFirst => "asc",
        }
    }

    /// Map the legacy `DOWNLOAD_REVERSE=true` switch onto a direction.
    pub fn from_reverse_flag(reverse: bool) -> Self {
        if reverse {
            Direction::OldestFirst
        } else {
            Direction::NewestFirst
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::NewestFirst => f.write_str("newest-first"),
            Direction::OldestFirst => f.write_str("oldest-first"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
