//! Configuration loading.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. an explicit path (e.g. a `--config` flag); it must exist
//! 2. `~/.tollgate/config.toml` (user)
//! 3. `/etc/tollgate/config.toml` (system)
//!
//! With no explicit path and no file in either location, defaults apply.
//! Every field has a default, so a file only needs the values it changes.
//! Nothing here reads environment variables; callers pass the resulting
//! settings into constructors.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::retry::{DEFAULT_RETRYABLE_STATUSES, RetryPolicy};
use crate::{Result, TollgateError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub stream: StreamSettings,
}

/// Retry policy settings, in TOML-friendly units.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetrySettings {
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds (default: 500).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any delay in milliseconds (default: 10000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor per attempt (default: 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Random spread as a fraction of the delay (default: 0.1).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// HTTP statuses worth retrying (default: 429, 502, 503, 504).
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

impl RetrySettings {
    /// Build and validate the policy these settings describe.
    pub fn to_policy(&self) -> Result<RetryPolicy> {
        let policy = RetryPolicy::new()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier)
            .jitter_factor(self.jitter_factor)
            .retryable_statuses(self.retryable_statuses.iter().copied());
        policy.validate()?;
        Ok(policy)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_retryable_statuses() -> Vec<u16> {
    DEFAULT_RETRYABLE_STATUSES.to_vec()
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Prepended to every key (default: empty).
    #[serde(default)]
    pub key_prefix: String,
    /// TTL for cache-aside entries in seconds (default: 300).
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Fresh window for stale-while-revalidate in seconds (default: 300).
    #[serde(default = "default_fresh_ttl_secs")]
    pub fresh_ttl_secs: u64,
    /// Stale window for stale-while-revalidate in seconds (default: 3600).
    #[serde(default = "default_stale_ttl_secs")]
    pub stale_ttl_secs: u64,
    /// Capacity of the in-process store (default: 10,000).
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// Redis URL; when unset the in-process store is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            default_ttl_secs: default_ttl_secs(),
            fresh_ttl_secs: default_fresh_ttl_secs(),
            stale_ttl_secs: default_stale_ttl_secs(),
            max_entries: default_max_entries(),
            redis_url: None,
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn fresh_ttl(&self) -> Duration {
        Duration::from_secs(self.fresh_ttl_secs)
    }

    pub fn stale_ttl(&self) -> Duration {
        Duration::from_secs(self.stale_ttl_secs)
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_fresh_ttl_secs() -> u64 {
    300
}

fn default_stale_ttl_secs() -> u64 {
    3600
}

fn default_max_entries() -> u64 {
    10_000
}

/// Stream reassembly settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StreamSettings {
    /// Abort a stream after this long without a fragment; 0 disables (default: 0).
    #[serde(default)]
    pub idle_timeout_ms: u64,
}

impl StreamSettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.tollgate/config.toml`
    /// 3. `/etc/tollgate/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_config_path(explicit_path)? else {
            debug!("no config file found, using defaults");
            return Ok(Self::default());
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            TollgateError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        debug!(path = %path.display(), "loading config");
        Self::from_toml_str(&content).map_err(|e| {
            TollgateError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| TollgateError::Configuration(e.to_string()))?;
        config.retry.to_policy()?;
        Ok(config)
    }

    /// The retry policy described by `[retry]`.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        self.retry.to_policy()
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(TollgateError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".tollgate").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/tollgate/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}
