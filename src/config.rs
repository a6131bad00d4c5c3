//! Configuration management for Slidegate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ratelimit::Policy;

/// Main configuration for Slidegate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidegateConfig {
    /// Rate limit policy
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// In-memory store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Rate limit policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Length of the rolling window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Number of buckets per window
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u64,

    /// Maximum events admitted per window
    #[serde(default = "default_limit")]
    pub limit: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            bucket_count: default_bucket_count(),
            limit: default_limit(),
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_bucket_count() -> u64 {
    6
}

fn default_limit() -> u64 {
    100
}

/// In-memory store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Lifetime of a newly seen key in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Expiry sweep interval in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    60
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

impl StoreConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl SlidegateConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SlidegateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build the validated rate limit policy.
    pub fn policy(&self) -> Result<Policy> {
        Policy::new(
            self.limiter.window_secs,
            self.limiter.bucket_count,
            self.limiter.limit,
        )
    }

    /// Check that the configuration describes a usable limiter.
    pub fn validate(&self) -> Result<()> {
        self.policy()?;
        if self.store.sweep_interval_ms == 0 {
            return Err(Error::Config(
                "store sweep interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
