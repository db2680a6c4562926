//! Runtime configuration.
//!
//! Every field has a built-in default; the binary overrides them from
//! command-line flags and `HN_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheBehavior;

pub const DEFAULT_API_BASE: &str = "https://hacker-news.firebaseio.com/v0";

/// Entries younger than this satisfy [`CacheBehavior::Default`].
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Disk records older than this are swept on load.
pub const DISK_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const SETTLE_WINDOW: Duration = Duration::from_millis(200);
pub const READY_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Single SQLite table.
    Sqlite,
    /// One file per key in a directory.
    Files,
}

impl std::str::FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "db" => Ok(CacheBackend::Sqlite),
            "files" | "fs" => Ok(CacheBackend::Files),
            other => Err(format!("unknown cache backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base: String,
    pub cache_backend: CacheBackend,
    /// Database file or directory, depending on the backend.
    pub cache_path: Option<PathBuf>,
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    #[serde(with = "secs")]
    pub freshness_window: Duration,
    #[serde(with = "secs")]
    pub disk_ttl: Duration,
    #[serde(with = "millis")]
    pub settle_window: Duration,
    #[serde(with = "millis")]
    pub ready_window: Duration,
    /// Top-level comments dispatched when a story is opened.
    pub initial_top_level: usize,
    pub cache_behavior: CacheBehavior,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            cache_backend: CacheBackend::Sqlite,
            cache_path: None,
            request_timeout: REQUEST_TIMEOUT,
            freshness_window: FRESHNESS_WINDOW,
            disk_ttl: DISK_TTL,
            settle_window: SETTLE_WINDOW,
            ready_window: READY_WINDOW,
            initial_top_level: 10,
            cache_behavior: CacheBehavior::Default,
        }
    }
}

impl Config {
    /// Application data directory, `~/.hn_reader`.
    pub fn app_data_dir() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".hn_reader"))
    }

    /// Where the disk tier lives: the explicit path, else a backend-specific
    /// default under the application data directory.
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cache_path {
            return Some(path.clone());
        }
        let dir = Self::app_data_dir()?;
        Some(match self.cache_backend {
            CacheBackend::Sqlite => dir.join("response_cache.db"),
            CacheBackend::Files => dir.join("response_cache"),
        })
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
