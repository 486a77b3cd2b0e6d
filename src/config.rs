use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::channel::ReconnectionPolicy;

/// Application-level constants
pub const APP_NAME: &str = "Caseflow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_API_URL: &str = "http://localhost:8080/api";
const DEFAULT_EVENTS_URL: &str = "ws://localhost:8080/events";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_UPLOAD_MB: u64 = 25;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "caseflow=info,warn"
}

/// Get the application data directory
/// ~/Caseflow/ on all platforms, falling back to the working directory
/// when no home directory can be resolved.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the durable cache database.
pub fn default_cache_path() -> PathBuf {
    app_data_dir().join("cache.db")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("I/O error preparing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Limits applied to files before they reach the intake API.
#[derive(Debug, Clone, Serialize)]
pub struct UploadLimits {
    pub max_file_bytes: u64,
    /// Accept plain UTF-8 text files in addition to PDFs and images.
    pub allow_plain_text: bool,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
            allow_plain_text: false,
        }
    }
}

/// Runtime configuration for one caseflow process.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    /// Base URL of the case REST API (no trailing slash).
    pub api_base_url: String,
    /// Websocket URL of the processing event channel.
    pub events_url: String,
    pub cache_path: PathBuf,
    pub request_timeout_secs: u64,
    /// Management id forwarded to the intake API with every upload.
    pub management_id: Option<String>,
    pub upload: UploadLimits,
    pub reconnect: ReconnectionPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.into(),
            events_url: DEFAULT_EVENTS_URL.into(),
            cache_path: default_cache_path(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            management_id: None,
            upload: UploadLimits::default(),
            reconnect: ReconnectionPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by `CASEFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("CASEFLOW_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = lookup("CASEFLOW_EVENTS_URL") {
            config.events_url = url;
        }
        if let Some(path) = lookup("CASEFLOW_CACHE_PATH") {
            config.cache_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("CASEFLOW_TIMEOUT_SECS") {
            config.request_timeout_secs = parse_positive("CASEFLOW_TIMEOUT_SECS", &raw)?;
        }
        if let Some(id) = lookup("CASEFLOW_MANAGEMENT_ID") {
            if !id.trim().is_empty() {
                config.management_id = Some(id);
            }
        }
        if let Some(raw) = lookup("CASEFLOW_MAX_UPLOAD_MB") {
            config.upload.max_file_bytes =
                parse_positive("CASEFLOW_MAX_UPLOAD_MB", &raw)? * 1024 * 1024;
        }

        Ok(config)
    }

    /// Make sure the cache directory exists before the database is opened.
    pub fn ensure_cache_dir(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.cache_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
        }),
    }
}
