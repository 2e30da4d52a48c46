//! Flush configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregate pending count that makes a flush due.
pub const DEFAULT_SIZE_THRESHOLD: usize = 300;
/// Milliseconds since the last flush that make a flush due.
pub const DEFAULT_TIME_THRESHOLD_MS: u64 = 300;
/// Longest the driver sleeps between two checks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// What happens to a batch whose flush callback failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Push the undelivered messages back to the front of their partition
    /// buffer, ahead of anything enqueued since the drain (at-least-once).
    /// A callback that panics counts as a failed call.
    #[default]
    Requeue,
    /// Discard the undelivered messages (at-most-once).
    Drop,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requeue => write!(f, "requeue"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requeue" | "retry" => Ok(Self::Requeue),
            "drop" => Ok(Self::Drop),
            _ => Err(anyhow::anyhow!(
                "Invalid failure policy: '{s}'. Expected 'requeue' or 'drop'"
            )),
        }
    }
}

/// Configuration shared by the cache and its auto-flush driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Aggregate (all partitions) pending count at which a flush is due
    pub size_threshold: usize,
    /// Time since the last flush after which a flush is due
    pub time_threshold_ms: u64,
    /// Upper bound on a single driver sleep, and the backoff applied after
    /// a cycle that reported failures
    pub poll_interval_ms: u64,
    /// Handling of batches whose callback failed
    pub failure_policy: FailurePolicy,
    /// Number of partitions one `flush_all` hands to the callback concurrently
    pub max_concurrent_flushes: usize,
    /// Largest batch handed to a single callback invocation.
    ///
    /// A drained partition larger than this is delivered as consecutive
    /// chunks, in order. `None` delivers the whole drained list at once.
    pub partition_batch_size: Option<usize>,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            time_threshold_ms: DEFAULT_TIME_THRESHOLD_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            failure_policy: FailurePolicy::default(),
            max_concurrent_flushes: 1,
            partition_batch_size: None,
        }
    }
}

impl FlushConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size_threshold(mut self, size_threshold: usize) -> Self {
        self.size_threshold = size_threshold;
        self
    }

    pub fn with_time_threshold(mut self, threshold: Duration) -> Self {
        self.time_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_max_concurrent_flushes(mut self, n: usize) -> Self {
        self.max_concurrent_flushes = n;
        self
    }

    pub fn with_partition_batch_size(mut self, size: Option<usize>) -> Self {
        self.partition_batch_size = size;
        self
    }

    pub fn time_threshold(&self) -> Duration {
        Duration::from_millis(self.time_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject configurations the driver cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.size_threshold == 0 {
            anyhow::bail!("size_threshold must be greater than zero");
        }
        if self.time_threshold_ms == 0 {
            anyhow::bail!("time_threshold_ms must be greater than zero");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if self.max_concurrent_flushes == 0 {
            anyhow::bail!("max_concurrent_flushes must be greater than zero");
        }
        if self.partition_batch_size == Some(0) {
            anyhow::bail!("partition_batch_size must be greater than zero when set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlushConfig::default();
        assert_eq!(config.size_threshold, 300);
        assert_eq!(config.time_threshold(), Duration::from_millis(300));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.failure_policy, FailurePolicy::Requeue);
        assert_eq!(config.max_concurrent_flushes, 1);
        assert!(config.partition_batch_size.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        assert!(FlushConfig::new().with_size_threshold(0).validate().is_err());
        assert!(FlushConfig::new()
            .with_time_threshold(Duration::ZERO)
            .validate()
            .is_err());
        assert!(FlushConfig::new()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(FlushConfig::new()
            .with_max_concurrent_flushes(0)
            .validate()
            .is_err());
        assert!(FlushConfig::new()
            .with_partition_batch_size(Some(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!("requeue".parse::<FailurePolicy>().unwrap(), FailurePolicy::Requeue);
        assert_eq!("RETRY".parse::<FailurePolicy>().unwrap(), FailurePolicy::Requeue);
        assert_eq!("Drop".parse::<FailurePolicy>().unwrap(), FailurePolicy::Drop);
        assert!("ignore".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::Drop.to_string(), "drop");
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: FlushConfig =
            serde_json::from_str(r#"{"size_threshold": 10, "failure_policy": "drop"}"#).unwrap();
        assert_eq!(config.size_threshold, 10);
        assert_eq!(config.failure_policy, FailurePolicy::Drop);
        assert_eq!(config.time_threshold_ms, DEFAULT_TIME_THRESHOLD_MS);
    }
}
