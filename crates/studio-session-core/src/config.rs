//! Session coordinator configuration.
//!
//! Every polling period and threshold used by the stores, the token manager,
//! the stale-session detector and the session monitor lives here so that
//! hosts can tune them and tests can compress them.
//!
//! Configuration is stored at `~/.config/design-studio/config.json`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application name used for config/data/cache directory paths
pub const APP_NAME: &str = "design-studio";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} must start with '/': {value}")]
    RelativePath { field: &'static str, value: String },

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Origin of the studio web application
    pub base_url: String,
    /// Login entry point used for forced re-authentication
    pub login_path: String,
    /// Endpoint returning the identity layer's current session object
    pub session_path: String,
    /// Endpoint returning `{ status, uptime }`
    pub health_path: String,
    /// Storage key of the persisted token snapshot
    pub token_storage_key: String,

    /// A token is "expiring soon" once it is within this many seconds of expiry.
    pub refresh_buffer_secs: i64,
    /// Session status reports "expiring" inside this window.
    pub expiring_window_secs: i64,
    /// A persisted expiry further in the past than this marks a stale session.
    pub stale_threshold_secs: i64,

    pub monitor_interval_secs: u64,
    pub widget_interval_secs: u64,
    pub token_check_interval_secs: u64,

    /// Consecutive 401 responses before emergency cleanup
    pub unauthorized_threshold: u32,
    pub max_refresh_attempts: u32,
    /// Retry ledger limit per operation key
    pub max_retries: u32,

    pub request_timeout_secs: u64,
    pub initial_backoff_ms: u64,

    /// Keep persisted tokens in the OS keychain instead of a plain file (CLI host)
    pub secure_storage: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            login_path: "/login".to_string(),
            session_path: "/api/auth/session".to_string(),
            health_path: "/api/health".to_string(),
            token_storage_key: "auth-token-storage".to_string(),
            refresh_buffer_secs: 5 * 60,
            expiring_window_secs: 2 * 60,
            stale_threshold_secs: 2 * 60 * 60,
            monitor_interval_secs: 30,
            widget_interval_secs: 30,
            token_check_interval_secs: 60,
            unauthorized_threshold: 3,
            max_refresh_attempts: 3,
            max_retries: 3,
            request_timeout_secs: 30,
            initial_backoff_ms: 1000,
            secure_storage: true,
        }
    }
}

impl SessionConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Self =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir =
            dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply `STUDIO_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("STUDIO_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(path) = std::env::var("STUDIO_LOGIN_PATH") {
            self.login_path = path;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::InvalidBaseUrl(format!("{}: {}", self.base_url, e)))?;

        for (field, value) in [
            ("login_path", &self.login_path),
            ("session_path", &self.session_path),
            ("health_path", &self.health_path),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::RelativePath {
                    field,
                    value: value.clone(),
                });
            }
        }

        if self.token_storage_key.is_empty() {
            return Err(ConfigError::Empty("token_storage_key"));
        }

        let positive = [
            ("refresh_buffer_secs", self.refresh_buffer_secs > 0),
            ("expiring_window_secs", self.expiring_window_secs > 0),
            ("stale_threshold_secs", self.stale_threshold_secs > 0),
            ("monitor_interval_secs", self.monitor_interval_secs > 0),
            ("widget_interval_secs", self.widget_interval_secs > 0),
            ("token_check_interval_secs", self.token_check_interval_secs > 0),
            ("unauthorized_threshold", self.unauthorized_threshold > 0),
            ("max_refresh_attempts", self.max_refresh_attempts > 0),
            ("max_retries", self.max_retries > 0),
            ("request_timeout_secs", self.request_timeout_secs > 0),
        ];
        for (field, ok) in positive {
            if !ok {
                return Err(ConfigError::ZeroValue(field));
            }
        }

        Ok(())
    }

    // ===== Derived durations =====

    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs)
    }

    pub fn expiring_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expiring_window_secs)
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_threshold_secs)
    }

    pub fn monitor_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn widget_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.widget_interval_secs)
    }

    pub fn token_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.token_check_interval_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    /// Join a configured path onto the base URL.
    pub fn url(&self, path: &str) -> Result<reqwest::Url> {
        let base = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL {}", self.base_url))?;
        base.join(path)
            .with_context(|| format!("Invalid path {}", path))
    }
}
