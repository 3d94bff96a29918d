//! Exponential backoff with jitter for fetch attempts.

use std::time::Duration;

use ccfetch_core::{CoreError, CoreResult, RetryConfig};

/// Decides whether and when to try a failed request again.
///
/// Only the error variant matters: transient network errors and truncated
/// bodies are retried, everything else fails on the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            config: RetryConfig {
                max_attempts: 1,
                ..Default::default()
            },
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Total attempts allowed, first try included.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether `error` on attempt number `attempt` (1-based) earns another try.
    pub fn should_retry(&self, error: &CoreError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.config.max_attempts
    }

    /// Delay before the retry following attempt `attempt` (1-based), jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .backoff_for_attempt(attempt.saturating_sub(1))
            .as_millis() as u64;

        let jitter_range = (delay_ms as f64 * self.config.jitter_percent) as u64;
        let jitter = rand::random::<u64>() % (jitter_range + 1);

        Duration::from_millis(delay_ms + jitter)
    }

    /// Upper bound for a server-requested pause (`Retry-After`).
    pub fn throttle_cap(&self) -> Duration {
        self.config.max_backoff() * 4
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }
}
