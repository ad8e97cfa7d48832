use std::{path::PathBuf, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::errors::EntitlementError;

const ENV_PREFIX: &str = "ENTITLEMENTS";

/// How long cached entitlements stay usable without a fresh server response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLifetime {
    OneDay,
    TwoDays,
    #[default]
    ThreeDays,
    Week,
    TwoWeeks,
    Month,
}

impl CacheLifetime {
    pub fn days(&self) -> i64 {
        match self {
            CacheLifetime::OneDay => 1,
            CacheLifetime::TwoDays => 2,
            CacheLifetime::ThreeDays => 3,
            CacheLifetime::Week => 7,
            CacheLifetime::TwoWeeks => 14,
            CacheLifetime::Month => 30,
        }
    }

    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::days(self.days())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Key identifying the project to the backend.
    pub project_key: String,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// In analytics-only mode purchases are reported but entitlements are
    /// never computed locally.
    #[serde(default)]
    pub analytics_mode: bool,
    #[serde(default)]
    pub background_cache_lifetime: CacheLifetime,
    #[serde(default)]
    pub foreground_cache_lifetime: CacheLifetime,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_min_delay_seconds: i64,
    #[serde(default = "default_retry_max_delay_seconds")]
    pub retry_max_delay_seconds: u64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: usize,
    #[serde(default = "default_rate_limit_window_millis")]
    pub rate_limit_window_millis: u64,
    /// JSON file with products and product permissions bundled with the app.
    #[serde(default)]
    pub fallback_file_path: Option<PathBuf>,
}

fn default_backend_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_max_delay_seconds() -> u64 {
    1000
}

fn default_rate_limit_max_requests() -> usize {
    5
}

fn default_rate_limit_window_millis() -> u64 {
    1000
}

impl EngineConfig {
    pub fn new(project_key: &str) -> Self {
        Self {
            project_key: project_key.to_string(),
            backend_url: default_backend_url(),
            analytics_mode: false,
            background_cache_lifetime: CacheLifetime::default(),
            foreground_cache_lifetime: CacheLifetime::default(),
            max_retries: default_max_retries(),
            retry_min_delay_seconds: 0,
            retry_max_delay_seconds: default_retry_max_delay_seconds(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_window_millis: default_rate_limit_window_millis(),
            fallback_file_path: None,
        }
    }

    /// Reads `ENTITLEMENTS_*` environment variables, e.g.
    /// `ENTITLEMENTS_PROJECT_KEY` or `ENTITLEMENTS_ANALYTICS_MODE`.
    pub fn from_env() -> Result<Self, EntitlementError> {
        Self::from_env_with_prefix(ENV_PREFIX)
    }

    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, EntitlementError> {
        Config::builder()
            .add_source(Environment::with_prefix(prefix).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize::<EngineConfig>())
            .map_err(|e| EntitlementError::Configuration(e.to_string()))
    }

    /// Reads a config file (format inferred from the extension); environment
    /// variables override file values.
    pub fn from_file(path: &str) -> Result<Self, EntitlementError> {
        Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize::<EngineConfig>())
            .map_err(|e| EntitlementError::Configuration(e.to_string()))
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_millis)
    }
}
