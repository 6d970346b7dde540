//! # Store Configuration
//!
//! Connection-level configuration for the shared KV store client. All retry
//! and timeout policy lives here; the components above the store adapter never
//! retry on their own.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the shared store client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Logical database index (a distinct index per environment, e.g. for
    /// test runs)
    pub database: u8,

    /// Fixed key prefix applied uniformly beneath component namespaces
    pub key_prefix: String,

    /// Connection establishment timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-command timeout
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Maximum number of command retries before surfacing an error
    pub max_retries: u32,

    /// Base delay between retries (scaled by attempt number)
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            database: 0,
            key_prefix: "brandhub:".to_string(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl StoreConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    ///
    /// Recognized variables: `REDIS_URL`, `REDIS_DATABASE`,
    /// `REDIS_KEY_PREFIX`, `REDIS_MAX_RETRIES`, `REDIS_CONNECT_TIMEOUT_MS`,
    /// `REDIS_COMMAND_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            database: env_parse("REDIS_DATABASE").unwrap_or(defaults.database),
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            connect_timeout: env_parse("REDIS_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            command_timeout: env_parse("REDIS_COMMAND_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.command_timeout),
            max_retries: env_parse("REDIS_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_delay: defaults.retry_delay,
        }
    }

    /// The connection URL with the logical database index appended, for
    /// clients that select the database through the URL path.
    pub fn effective_url(&self) -> String {
        if self.database == 0 {
            self.url.clone()
        } else {
            format!("{}/{}", self.url.trim_end_matches('/'), self.database)
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
