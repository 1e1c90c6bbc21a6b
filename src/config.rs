use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file
    #[serde(default = "Config::default_db_path")]
    pub db_path: String,
    /// Address the HTTP server binds to
    #[serde(default = "Config::default_bind_addr")]
    pub bind_addr: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Upstream feeds to poll
    pub providers: Vec<ProviderConfig>,
    /// Polling and trail-derivation settings
    #[serde(default)]
    pub collector: CollectorConfig,
    /// Coverage cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// One upstream AVL feed. The `kind` selects the parser; everything else
/// is opaque to the core.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// City tag stamped on every vehicle and position from this feed
    pub city: String,
    pub url: String,
    /// Referer header some municipal map servers require
    #[serde(default)]
    pub referer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// ArcGIS AVL feature service (epoch-ms timestamps in local standard time)
    Avl,
    /// Mt. Pearl fleet feed (JSON array, ISO-8601 timestamps)
    MtPearl,
}

/// Configuration for the poll loop and trail derivation
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Interval in seconds between poll cycles (default: 6)
    #[serde(default = "CollectorConfig::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Timeout in seconds for each upstream request (default: 10)
    #[serde(default = "CollectorConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Number of recent samples considered for the live mini-trail (default: 50)
    #[serde(default = "CollectorConfig::default_trail_points")]
    pub trail_points: u32,
    /// A gap larger than this splits a trail into segments (default: 120)
    #[serde(default = "CollectorConfig::default_max_gap_secs")]
    pub max_gap_secs: i64,
    /// Coverage downsampling bucket in seconds (default: 30)
    #[serde(default = "CollectorConfig::default_bucket_secs")]
    pub bucket_secs: i64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: Self::default_poll_interval_secs(),
            request_timeout_secs: Self::default_request_timeout_secs(),
            trail_points: Self::default_trail_points(),
            max_gap_secs: Self::default_max_gap_secs(),
            bucket_secs: Self::default_bucket_secs(),
        }
    }
}

impl CollectorConfig {
    fn default_poll_interval_secs() -> u64 {
        6
    }
    fn default_request_timeout_secs() -> u64 {
        10
    }
    fn default_trail_points() -> u32 {
        50
    }
    fn default_max_gap_secs() -> i64 {
        120
    }
    fn default_bucket_secs() -> i64 {
        30
    }
}

/// Configuration for the file-backed coverage cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory cache entries are written to
    #[serde(default = "CacheConfig::default_dir")]
    pub dir: String,
    /// Aggregate size budget in bytes (default: 200 MiB)
    #[serde(default = "CacheConfig::default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            max_bytes: Self::default_max_bytes(),
        }
    }
}

impl CacheConfig {
    fn default_dir() -> String {
        std::env::temp_dir()
            .join("plowtrack-cache")
            .to_string_lossy()
            .into_owned()
    }
    fn default_max_bytes() -> u64 {
        200 * 1024 * 1024
    }
}

impl Config {
    fn default_db_path() -> String {
        "data/plow.db".to_string()
    }

    fn default_bind_addr() -> String {
        "0.0.0.0:3000".to_string()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
