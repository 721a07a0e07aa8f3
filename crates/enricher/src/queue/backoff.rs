use std::time::Duration;

use crate::config::{BackoffStrategy, RetryConfig};

/// Decides whether a failed delivery is retried and after how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: Duration::from_millis(config.backoff_base_ms),
            strategy: config.strategy,
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            base,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before re-running a job whose execution number `attempt`
    /// (0-based) just failed: `base * 2^attempt`, or `base` when fixed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.base,
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                self.base.saturating_mul(factor)
            }
        }
    }

    /// True when a failure at `attempt` still has retries left.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
