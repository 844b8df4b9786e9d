//! Engine configuration.
//!
//! Every section derives `Deserialize` with `#[serde(default)]`, so a partial
//! JSON document only overrides the keys it names:
//!
//! ```
//! use paintnook_sync::SyncConfig;
//!
//! let config = SyncConfig::from_json(r#"{ "retry": { "maxAttempts": 2 } }"#).unwrap();
//! assert_eq!(config.retry.max_attempts, 2);
//! assert_eq!(config.retry.base_delay, 1000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::MergeStrategy;

/// Exponential backoff for outbound sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Retries after the first failed send.
    pub max_attempts: u32,
    /// ms
    pub base_delay: u64,
    /// ms
    pub max_delay: u64,
    pub backoff_multiplier: f64,
    /// Relative jitter, 0.1 = ±10%.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: 1000,
            max_delay: 30_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// `min(base × multiplier^attempt, max)` in milliseconds.
    pub fn backoff_ms(&self, attempt: u32) -> f64 {
        let exp = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        (self.base_delay as f64 * exp).min(self.max_delay as f64)
    }

    /// Backoff for `attempt` with jitter applied. `sample` is uniform in
    /// `[0, 1)`.
    pub fn delay(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.backoff_ms(attempt);
        let ms = base * (1.0 + (sample - 0.5) * 2.0 * self.jitter);
        if ms.is_finite() && ms > 0.0 {
            Duration::from_secs_f64(ms / 1000.0)
        } else {
            Duration::ZERO
        }
    }
}

/// Outbound batching, see [`ActionQueue`](crate::ActionQueue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchConfig {
    pub max_size: usize,
    /// ms
    pub flush_interval: u64,
    /// ms
    pub max_latency: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            flush_interval: 16,
            max_latency: 100,
        }
    }
}

impl BatchConfig {
    /// Delay for the flush timer. Never longer than the latency ceiling.
    pub fn timer_delay(&self) -> Duration {
        Duration::from_millis(self.flush_interval.min(self.max_latency))
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency)
    }
}

/// Conflict handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PriorityConfig {
    /// Host actions are stamped with host priority.
    pub host_override: bool,
    /// ms
    pub conflict_window: u64,
    pub merge_strategy: MergeStrategy,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            host_override: true,
            conflict_window: 500,
            merge_strategy: MergeStrategy::HostOverride,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatConfig {
    /// ms
    pub interval: u64,
    /// ms without a successful heartbeat before the transport is dropped.
    pub timeout: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: 5000,
            timeout: 15_000,
        }
    }
}

/// Top-level configuration for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub priority: PriorityConfig,
    pub heartbeat: HeartbeatConfig,
    /// Remembered action ids for deduplication.
    pub dedup_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            priority: PriorityConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            dedup_capacity: 65_536,
        }
    }
}

impl SyncConfig {
    /// Parse a partial JSON config over the defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
