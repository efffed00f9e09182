//! Configuration file parser for ~/.config/feedsync/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::api::ApiSettings;
use crate::cache::{CacheSettings, SizeLimits};
use crate::network::NetworkClass;
use crate::sync::SyncSettings;
use crate::util::{api_endpoint, HostPolicy};

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

    /// Values parse but cannot be used (missing server URL, bad URL).
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All sections use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    /// Network class reported to the sync and cache layers
    pub network: NetworkClass,
}

/// `[server]` section.
///
/// Custom Debug impl masks both passwords.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the server; the API endpoint is `<url>/api/`
    pub url: String,
    pub username: String,
    pub password: String,
    /// HTTP basic auth in front of the server
    pub http_username: Option<String>,
    pub http_password: Option<String>,
    /// Use `slow_read_timeout_secs` instead of `read_timeout_secs`
    pub slow_server: bool,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub slow_read_timeout_secs: u64,
    pub max_response_mb: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            http_username: None,
            http_password: None,
            slow_server: false,
            connect_timeout_secs: 8,
            read_timeout_secs: 10,
            slow_read_timeout_secs: 900,
            max_response_mb: 32,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("http_username", &self.http_username)
            .field(
                "http_password",
                &self.http_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("slow_server", &self.slow_server)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("slow_read_timeout_secs", &self.slow_read_timeout_secs)
            .field("max_response_mb", &self.max_response_mb)
            .finish()
    }
}

/// `[sync]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub min_refresh_minutes: u64,
    pub article_limit: usize,
    pub work_offline: bool,
    pub cleanup_interval_hours: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_refresh_minutes: 30,
            article_limit: 5000,
            work_offline: false,
            cleanup_interval_hours: 24,
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Defaults to `<config dir>/cache`
    pub dir: Option<PathBuf>,
    pub max_size_mb: u64,
    pub image_min_kb: u64,
    pub image_max_kb: u64,
    pub workers: usize,
    pub wait_minutes: u64,
    /// Also download media from localhost and private networks
    pub allow_private_hosts: bool,
    /// Fetch feed icons during the metadata phase
    pub feed_icons: bool,
    /// Defaults to `<server url>/feed-icons/`
    pub icons_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_size_mb: 80,
            image_min_kb: 1,
            image_max_kb: 6144,
            workers: 6,
            wait_minutes: 30,
            allow_private_hosts: false,
            feed_icons: true,
            icons_url: None,
        }
    }
}

const MB: u64 = 1024 * 1024;

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(if self.slow_server {
            self.slow_read_timeout_secs
        } else {
            self.read_timeout_secs
        })
    }

    /// Transport settings for the API client.
    pub fn api_settings(&self) -> Result<ApiSettings, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("server.url is not set".to_string()));
        }
        let endpoint = api_endpoint(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("server.url: {e}")))?;

        let http_auth = match (&self.http_username, &self.http_password) {
            (Some(user), password) if !user.is_empty() => Some((
                user.clone(),
                SecretString::from(password.clone().unwrap_or_default()),
            )),
            _ => None,
        };

        Ok(ApiSettings {
            endpoint,
            username: self.username.clone(),
            password: SecretString::from(self.password.clone()),
            http_auth,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: self.read_timeout(),
            max_response_bytes: usize::try_from(self.max_response_mb.saturating_mul(MB))
                .unwrap_or(usize::MAX),
        })
    }
}

impl SyncConfig {
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            min_refresh: Duration::from_secs(self.min_refresh_minutes * 60),
            article_limit: self.article_limit,
            work_offline: self.work_offline,
            cleanup_interval: Duration::from_secs(self.cleanup_interval_hours * 3600),
        }
    }
}

impl CacheConfig {
    /// Cache settings; `default_dir` is used when `dir` is not set.
    pub fn cache_settings(&self, default_dir: &Path, server: &ServerConfig) -> CacheSettings {
        CacheSettings {
            dir: self.dir.clone().unwrap_or_else(|| default_dir.to_path_buf()),
            max_size: self.max_size_mb.saturating_mul(MB),
            limits: SizeLimits {
                min: self.image_min_kb.saturating_mul(1024),
                max: self.image_max_kb.saturating_mul(1024),
            },
            workers: self.workers.max(1),
            max_wait: Duration::from_secs(self.wait_minutes * 60),
            hosts: if self.allow_private_hosts {
                HostPolicy::AllowPrivate
            } else {
                HostPolicy::PublicOnly
            },
            connect_timeout: Duration::from_secs(server.connect_timeout_secs),
            read_timeout: server.read_timeout(),
            icons_url: self.feed_icons_url(server),
        }
    }

    fn feed_icons_url(&self, server: &ServerConfig) -> Option<Url> {
        if !self.feed_icons {
            return None;
        }
        let parsed = match &self.icons_url {
            Some(url) => Url::parse(&format!("{}/", url.trim().trim_end_matches('/')))
                .map_err(|e| e.to_string()),
            None => api_endpoint(&server.url)
                .map_err(|e| e.to_string())
                .and_then(|endpoint| endpoint.join("../feed-icons/").map_err(|e| e.to_string())),
        };
        match parsed {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(error = %e, "No usable feed icon URL, icons are not fetched");
                None
            }
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const SECTIONS: [(&'static str, &'static [&'static str]); 3] = [
        (
            "server",
            &[
                "url",
                "username",
                "password",
                "http_username",
                "http_password",
                "slow_server",
                "connect_timeout_secs",
                "read_timeout_secs",
                "slow_read_timeout_secs",
                "max_response_mb",
            ],
        ),
        (
            "sync",
            &[
                "min_refresh_minutes",
                "article_limit",
                "work_offline",
                "cleanup_interval_hours",
            ],
        ),
        (
            "cache",
            &[
                "dir",
                "max_size_mb",
                "image_min_kb",
                "image_max_kb",
                "workers",
                "wait_minutes",
                "allow_private_hosts",
                "feed_icons",
                "icons_url",
            ],
        ),
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
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
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration text, warning about unknown keys.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in Self::unknown_keys(&raw) {
                tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            server = %config.server.url,
            network = ?config.network,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn unknown_keys(raw: &toml::Table) -> Vec<String> {
        let mut unknown = Vec::new();
        for (key, value) in raw {
            if key == "network" {
                continue;
            }
            let Some((_, known)) = Self::SECTIONS.iter().find(|(name, _)| name == key) else {
                unknown.push(key.clone());
                continue;
            };
            if let Some(table) = value.as_table() {
                for inner in table.keys() {
                    if !known.contains(&inner.as_str()) {
                        unknown.push(format!("{key}.{inner}"));
                    }
                }
            }
        }
        unknown
    }
}

// ============================================================================
// Tests
// ============================================================================
