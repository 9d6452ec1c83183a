//! Configuration file parser for `trailers.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::feed::FetcherOptions;
use crate::import::DEFAULT_WINDOW;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid feed URL {url:?}: {reason}")]
    InvalidFeedUrl { url: String, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Import configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address of the RSS feed to import.
    pub feed_url: String,

    /// Destination table, replaced on every run.
    pub table_name: String,

    /// SQLite database file (`:memory:` for a throwaway database).
    pub database_path: PathBuf,

    /// Netscape-format cookie jar, read before and rewritten after each fetch.
    pub cookie_jar: PathBuf,

    /// Number of trailing feed items imported per run.
    pub window: usize,

    /// Request timeout in seconds. 0 = no timeout.
    pub request_timeout_secs: u64,

    /// Maximum number of redirects followed.
    pub max_redirects: usize,

    /// Skip TLS certificate verification. On by default; the upstream feed
    /// has been served with certificates that fail verification.
    pub accept_invalid_certs: bool,

    /// Maximum accepted response body size in bytes.
    pub max_feed_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        let fetcher = FetcherOptions::default();
        Self {
            feed_url: "https://trailers.apple.com/trailers/home/rss/newtrailers.rss".to_string(),
            table_name: "movie".to_string(),
            database_path: PathBuf::from("trailers.db"),
            cookie_jar: fetcher.cookie_jar,
            window: DEFAULT_WINDOW,
            request_timeout_secs: 0,
            max_redirects: fetcher.max_redirects,
            accept_invalid_certs: fetcher.accept_invalid_certs,
            max_feed_bytes: fetcher.max_feed_bytes,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "feed_url",
        "table_name",
        "database_path",
        "cookie_jar",
        "window",
        "request_timeout_secs",
        "max_redirects",
        "accept_invalid_certs",
        "max_feed_bytes",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
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
            Ok(_) => {} // Size is within limits, proceed
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

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feed_url = %config.feed_url,
            table = %config.table_name,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Checks values that cannot be expressed in the TOML types alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidFeedUrl {
            url: self.feed_url.clone(),
            reason,
        };
        let url = Url::parse(&self.feed_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(invalid(format!(
                "unsupported scheme {} (only http/https allowed)",
                scheme
            ))),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn fetcher_options(&self) -> FetcherOptions {
        FetcherOptions {
            cookie_jar: self.cookie_jar.clone(),
            timeout: self.request_timeout(),
            max_redirects: self.max_redirects,
            accept_invalid_certs: self.accept_invalid_certs,
            max_feed_bytes: self.max_feed_bytes,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
