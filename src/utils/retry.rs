//! Retry utilities with exponential backoff
//!
//! Used by the pool's background dial probe: once the dial-failure circuit
//! opens, a single task keeps redialing with exponential backoff and jitter
//! until the backend answers or the pool closes.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial attempt)
    pub max_retries: u32,

    /// Initial delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries (caps exponential growth)
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0)
    pub multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retry attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Retry until the operation succeeds or reports a non-retryable error
    pub fn unbounded(mut self) -> Self {
        self.max_retries = u32::MAX;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Calculate delay for a given attempt number (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        // Jitter adds a random value between 0 and the base delay
        let delay_ms = if self.use_jitter && delay_ms > 0.0 {
            delay_ms + rand::thread_rng().gen_range(0.0..delay_ms)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, E>,

    /// Number of attempts made
    pub attempts: u32,

    /// Total time spent sleeping between attempts
    pub total_delay: Duration,
}

/// Execute an async operation with retry logic
///
/// `is_retryable` decides whether a failure is worth another attempt; the
/// loop stops at the first success, the first non-retryable error, or once
/// `max_retries` is spent.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    config: &RetryConfig,
    is_retryable: R,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempts: u32 = 0;
    let mut total_delay = Duration::ZERO;

    loop {
        attempts = attempts.saturating_add(1);

        match operation().await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_delay,
                };
            }
            Err(err) => {
                if attempts > config.max_retries || !is_retryable(&err) {
                    return RetryResult {
                        result: Err(err),
                        attempts,
                        total_delay,
                    };
                }

                let delay = config.calculate_delay(attempts - 1);
                total_delay += delay;

                tracing::debug!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transient failure"
                );

                sleep(delay).await;
            }
        }
    }
}

/// Retry configuration presets
pub mod presets {
    use super::*;

    /// Background dial probe: retries until the backend is reachable again,
    /// starting at one second and backing off to thirty.
    pub fn dial_probe() -> RetryConfig {
        RetryConfig::new()
            .unbounded()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30))
            .with_multiplier(2.0)
            .with_jitter(true)
    }
}
