//! Configuration loading for the job status store.

use std::time::Duration;

use thiserror::Error;

/// Default Redis endpoint when `REDIS_URL` is unset.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default record retention (1 hour from the last write).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Longest accepted retention (30 days).
pub const MAX_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default key namespace for job records.
pub const DEFAULT_KEY_PREFIX: &str = "cosmo:jobs";

pub const REDIS_URL_VAR: &str = "REDIS_URL";
pub const RETENTION_VAR: &str = "JOB_RETENTION_SECS";
pub const KEY_PREFIX_VAR: &str = "JOB_KEY_PREFIX";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be between 1 and 2592000 seconds (30 days), got {value:?}")]
    InvalidRetention { var: &'static str, value: String },

    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStoreConfig {
    pub redis_url: String,
    pub retention: Duration,
    pub key_prefix: String,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            retention: DEFAULT_RETENTION,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl JobStoreConfig {
    /// Load from process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(REDIS_URL_VAR) {
            let url = url.trim();
            if url.is_empty() {
                return Err(ConfigError::Empty { var: REDIS_URL_VAR });
            }
            config.redis_url = url.to_string();
        } else {
            tracing::debug!(default = DEFAULT_REDIS_URL, "REDIS_URL not set; using default");
        }

        if let Some(raw) = lookup(RETENTION_VAR) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| (1..=MAX_RETENTION.as_secs()).contains(secs))
                .ok_or_else(|| ConfigError::InvalidRetention {
                    var: RETENTION_VAR,
                    value: raw.clone(),
                })?;
            config.retention = Duration::from_secs(secs);
        }

        if let Some(prefix) = lookup(KEY_PREFIX_VAR) {
            let prefix = prefix.trim().trim_end_matches(':');
            if prefix.is_empty() {
                return Err(ConfigError::Empty { var: KEY_PREFIX_VAR });
            }
            config.key_prefix = prefix.to_string();
        }

        Ok(config)
    }
}
