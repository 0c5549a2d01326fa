//! Aggregate configuration for a guarded resource.
//!
//! Bundles the per-policy configs so an application can load one TOML
//! table (or environment overrides) and hand pieces to each policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;

/// Everything needed to guard one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub timeout: TimeoutConfig,
    pub breaker: BreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig {
                jitter: true,
                ..RetryConfig::default()
            },
            timeout: TimeoutConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Fluent builder over [`ResilienceConfig`].
pub struct ConfigBuilder {
    config: ResilienceConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.retry.backoff_multiplier = multiplier;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.retry.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.config.retry.jitter = enabled;
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.config.timeout.limit = limit;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.breaker.failure_threshold = threshold;
        self
    }

    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.config.breaker.break_duration = duration;
        self
    }

    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

/// Load a [`ResilienceConfig`] from a TOML file.
pub fn from_file(
    path: impl AsRef<std::path::Path>,
) -> Result<ResilienceConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ResilienceConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Build a config from environment variables, starting from defaults.
///
/// Recognized: `BREAKWATER_MAX_ATTEMPTS`, `BREAKWATER_TIMEOUT_SECS`,
/// `BREAKWATER_FAILURE_THRESHOLD`, `BREAKWATER_BREAK_SECS`. Unparsable
/// values are ignored.
pub fn from_env() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();

    if let Ok(attempts) = std::env::var("BREAKWATER_MAX_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            config.retry.max_attempts = n.max(1);
        }
    }

    if let Ok(secs) = std::env::var("BREAKWATER_TIMEOUT_SECS") {
        if let Ok(n) = secs.parse::<u64>() {
            config.timeout.limit = Duration::from_secs(n);
        }
    }

    if let Ok(threshold) = std::env::var("BREAKWATER_FAILURE_THRESHOLD") {
        if let Ok(n) = threshold.parse::<u32>() {
            config.breaker.failure_threshold = n.max(1);
        }
    }

    if let Ok(secs) = std::env::var("BREAKWATER_BREAK_SECS") {
        if let Ok(n) = secs.parse::<u64>() {
            config.breaker.break_duration = Duration::from_secs(n);
        }
    }

    config
}
