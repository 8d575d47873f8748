//! Channel configuration.

use crate::error::OtResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Exponential backoff between resync attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first resync, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000, // 30 seconds
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before resync attempt number `attempt` (starting at 0).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for an operation channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// How long local edits are batched before a send, in milliseconds.
    pub send_delay_ms: u64,
    /// Backoff between resync attempts after a failure.
    pub retry: RetryPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl ChannelConfig {
    /// Batching delay as a duration.
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    /// Load configuration from a JSON file, or return defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load(path: impl AsRef<Path>) -> OtResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<ChannelConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse channel config {}, using defaults: {}",
                    path.display(),
                    e
                );
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ChannelConfig =
            serde_json::from_str(r#"{"send_delay_ms": 25, "retry": {"max_delay_ms": 2000}}"#)
                .unwrap();
        assert_eq!(config.send_delay(), Duration::from_millis(25));
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 2000);
    }

    #[test]
    fn test_load_missing_and_invalid_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("channel.json");

        assert_eq!(ChannelConfig::load(&path).unwrap(), ChannelConfig::default());

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(ChannelConfig::load(&path).unwrap(), ChannelConfig::default());

        std::fs::write(&path, r#"{"send_delay_ms": 10}"#).unwrap();
        assert_eq!(ChannelConfig::load(&path).unwrap().send_delay_ms, 10);
    }
}
