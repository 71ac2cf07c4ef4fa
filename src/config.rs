//! Configuration file parser for ~/.config/today/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged as a warning, since they are usually
//! typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{DEFAULT_MAX_ARTICLES, DEFAULT_MAX_FEED_SIZE};
use crate::util::{validate_endpoint, UrlValidationError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid {key}: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: UrlValidationError,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON array of feed items.
    pub feed_url: String,

    /// JSON array of publishers.
    pub publishers_url: String,

    /// SQLite file for the persisted feed and publisher overrides.
    /// Defaults to `today.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Per-request timeout for the feed and publisher fetches.
    /// Unset or 0 waits indefinitely.
    pub fetch_timeout_secs: Option<u64>,

    /// Maximum accepted feed response size in bytes.
    pub max_feed_bytes: usize,

    /// Maximum number of non-featured articles kept in the feed.
    pub max_articles: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "https://today-cdn.example.com/feed.json".to_string(),
            publishers_url: "https://today-cdn.example.com/sources.json".to_string(),
            database_path: None,
            fetch_timeout_secs: None,
            max_feed_bytes: DEFAULT_MAX_FEED_SIZE,
            max_articles: DEFAULT_MAX_ARTICLES,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "feed_url",
        "publishers_url",
        "database_path",
        "fetch_timeout_secs",
        "max_feed_bytes",
        "max_articles",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Non-https remote endpoint → `Err(ConfigError::InvalidUrl)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a huge corrupt file
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), feed_url = %config.feed_url, "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.feed_url).map_err(|source| ConfigError::InvalidUrl {
            key: "feed_url",
            source,
        })?;
        validate_endpoint(&self.publishers_url).map_err(|source| ConfigError::InvalidUrl {
            key: "publishers_url",
            source,
        })?;
        Ok(())
    }

    /// `None` when requests may wait indefinitely.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Database location, resolving the default against `config_dir`.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("today.db"))
    }
}

// ============================================================================
// Tests
// ============================================================================
