use std::time::Duration;

use orb_heap::HeapConfig;
use orb_types::{OrbError, OrbResult};
use serde::{Deserialize, Serialize};

/// Bounded exponential backoff for retryable failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. At least one is always made.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Delay before the retry following attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 20,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
        }
    }
}

/// Client runtime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline for a single backend call.
    pub rpc_timeout_ms: u64,
    /// How long local operations wait for an object lock.
    pub lock_timeout_ms: u64,
    /// Dataset used when none is given.
    pub default_dataset: String,
    pub retry: RetryPolicy,
    pub heap: HeapConfig,
    pub run_sweeper: bool,
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> OrbResult<Self> {
        toml::from_str(s).map_err(|e| OrbError::InvalidArgument(format!("client config: {e}")))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 10_000,
            lock_timeout_ms: 5_000,
            default_dataset: "default".into(),
            retry: RetryPolicy::default(),
            heap: HeapConfig::default(),
            run_sweeper: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(80));
        assert_eq!(policy.backoff(20), Duration::from_millis(1_000));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
        assert!(!RetryPolicy::none().allows_retry(1));
        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(!zero.allows_retry(1));
    }

    #[test]
    fn parses_nested_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            default_dataset = "people"

            [retry]
            max_attempts = 2

            [heap]
            idle_threshold_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.default_dataset, "people");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_backoff_ms, 20);
        assert_eq!(config.heap.idle_threshold_ms, 500);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(10));
    }
}
