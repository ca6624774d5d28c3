//! Exponential backoff for connection and metadata operations
//!
//! Only errors whose [`crate::Error::is_retriable`] is true (network failures and
//! timeouts) are retried. Everything else is returned on the first attempt.

use crate::error::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry)
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (fail immediately)
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a retry config with fixed delay (no exponential backoff)
    pub fn fixed_delay(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Set max retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set max delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor, clamped to `0.0..=1.0`
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay before the given retry (1-based; attempt 0 has no delay)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let capped_attempt = attempt.min(30);
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(capped_attempt as i32 - 1);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        // deterministic golden-ratio jitter
        let jitter = if self.jitter_factor > 0.0 {
            let jitter_value = (attempt as f64 * 0.618033988749895) % 1.0;
            capped_delay * self.jitter_factor * (jitter_value - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((capped_delay + jitter).max(0.0) as u64)
    }
}

/// Outcome of [`retry_with_stats`]
#[derive(Debug)]
pub struct RetryResult<T> {
    /// Final result
    pub result: Result<T>,
    /// Number of attempts made (at least 1)
    pub attempts: u32,
    /// Total time spent including delays
    pub total_duration: Duration,
}

/// Run `operation` until it succeeds, fails with a non-retriable error, or
/// the retry budget is spent. `what` names the operation in logs.
pub async fn retry<T, F, Fut>(config: &RetryConfig, what: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_stats(config, what, operation).await.result
}

/// Like [`retry`], also reporting the attempt count
pub async fn retry_with_stats<T, F, Fut>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation = what, attempts, "Succeeded after retry");
                }
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) if e.is_retriable() && attempts <= config.max_retries => {
                let delay = config.delay_for_attempt(attempts);
                warn!(
                    operation = what,
                    attempt = attempts,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retriable failure: {}",
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retriable() {
                    warn!(operation = what, attempts, "Retries exhausted: {}", e);
                }
                return RetryResult {
                    result: Err(e),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
        }
    }
}
