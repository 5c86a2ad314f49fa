//! Configuration management for ReviewSync
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from YAML files and `REVIEWSYNC_*` environment variables.

use crate::error::ReviewSyncError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for ReviewSync
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backend REST settings
    #[serde(default)]
    pub api: ApiConfig,
    /// Live event channel settings
    #[serde(default)]
    pub live: LiveConfig,
    /// Session and credential storage settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend REST configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every REST path is joined onto
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Timeout for read requests such as listing feedback (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Upper bound on the wait for a create/update/delete (seconds)
    #[serde(default = "default_mutation_timeout")]
    pub mutation_timeout_seconds: u64,

    /// Page size used when a view does not ask for one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_mutation_timeout() -> u64 {
    10
}

fn default_page_size() -> u32 {
    10
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            request_timeout_seconds: default_request_timeout(),
            mutation_timeout_seconds: default_mutation_timeout(),
            default_page_size: default_page_size(),
        }
    }
}

impl ApiConfig {
    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Mutation timeout as a [`Duration`]
    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_secs(self.mutation_timeout_seconds)
    }
}

/// Live event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Event stream URL (server-sent events)
    #[serde(default = "default_live_url")]
    pub url: String,

    /// First reconnect delay after a drop (milliseconds)
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Ceiling for the reconnect delay (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Growth factor applied to the delay after each failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_live_url() -> String {
    "http://localhost:8080/events".to_string()
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            url: default_live_url(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Where long-lived credentials are kept
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialBackend {
    /// JSON file in the platform data directory
    #[default]
    File,
    /// OS native keyring
    Keyring,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Storage key namespace for the persisted credential
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Navigation target used when the session is unusable
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Override for the durable credential directory
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Durable credential backend
    #[serde(default)]
    pub backend: CredentialBackend,
}

fn default_namespace() -> String {
    "reviewsync".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            login_path: default_login_path(),
            storage_dir: None,
            backend: CredentialBackend::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json_format: bool,

    /// Optional file receiving a copy of every log line
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_vars();

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ReviewSyncError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("REVIEWSYNC_API_BASE_URL") {
            tracing::debug!(base_url = %base_url, "Env override: REVIEWSYNC_API_BASE_URL");
            self.api.base_url = base_url;
        }

        if let Ok(timeout) = std::env::var("REVIEWSYNC_REQUEST_TIMEOUT_SECONDS") {
            match timeout.parse() {
                Ok(v) => self.api.request_timeout_seconds = v,
                Err(_) => tracing::warn!("Invalid REVIEWSYNC_REQUEST_TIMEOUT_SECONDS: {}", timeout),
            }
        }

        if let Ok(timeout) = std::env::var("REVIEWSYNC_MUTATION_TIMEOUT_SECONDS") {
            match timeout.parse() {
                Ok(v) => self.api.mutation_timeout_seconds = v,
                Err(_) => {
                    tracing::warn!("Invalid REVIEWSYNC_MUTATION_TIMEOUT_SECONDS: {}", timeout)
                }
            }
        }

        if let Ok(live_url) = std::env::var("REVIEWSYNC_LIVE_URL") {
            tracing::debug!(live_url = %live_url, "Env override: REVIEWSYNC_LIVE_URL");
            self.live.url = live_url;
        }

        if let Ok(namespace) = std::env::var("REVIEWSYNC_SESSION_NAMESPACE") {
            self.session.namespace = namespace;
        }

        if let Ok(level) = std::env::var("REVIEWSYNC_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json_logs) = std::env::var("REVIEWSYNC_JSON_LOGS") {
            match json_logs.parse::<bool>() {
                Ok(v) => self.logging.json_format = v,
                Err(_) => tracing::warn!("Invalid value for REVIEWSYNC_JSON_LOGS: {}", json_logs),
            }
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ReviewSyncError::Config`] naming the first offending field
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api.base_url).map_err(|e| {
            ReviewSyncError::Config(format!("api.base_url is not a valid URL: {}", e))
        })?;

        url::Url::parse(&self.live.url)
            .map_err(|e| ReviewSyncError::Config(format!("live.url is not a valid URL: {}", e)))?;

        if self.api.request_timeout_seconds == 0 {
            return Err(ReviewSyncError::Config(
                "api.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.api.mutation_timeout_seconds == 0 {
            return Err(ReviewSyncError::Config(
                "api.mutation_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.api.default_page_size == 0 || self.api.default_page_size > 100 {
            return Err(ReviewSyncError::Config(
                "api.default_page_size must be between 1 and 100".to_string(),
            )
            .into());
        }

        if self.live.initial_backoff_ms == 0 || self.live.initial_backoff_ms > self.live.max_backoff_ms
        {
            return Err(ReviewSyncError::Config(
                "live.initial_backoff_ms must be positive and not exceed live.max_backoff_ms"
                    .to_string(),
            )
            .into());
        }

        if self.live.backoff_multiplier < 1.0 {
            return Err(ReviewSyncError::Config(
                "live.backoff_multiplier must be at least 1.0".to_string(),
            )
            .into());
        }

        if self.session.namespace.trim().is_empty() {
            return Err(
                ReviewSyncError::Config("session.namespace cannot be empty".to_string()).into(),
            );
        }

        Ok(())
    }
}
