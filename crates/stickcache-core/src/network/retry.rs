//! Bounded retry with exponential backoff for origin fetches.
//!
//! Only idempotent strategies retry. The default policy is a single retry;
//! `max_attempts` counts the first attempt.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub exponential_base: f64,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let capped = (self.base_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            // Scale by 0.5..1.5 so concurrent clients spread out without
            // collapsing to zero.
            let factor = rand::rng().random_range(0.5..1.5);
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }
}

/// Outcome bookkeeping for one retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        let err = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!(attempts = stats.attempts, "Fetch succeeded after retry");
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        stats.last_error = Some(err.to_string());

        if !should_retry(&err) {
            debug!(error = %err, "Error is not retryable");
            return (Err(err), stats);
        }

        if attempt + 1 >= config.max_attempts {
            if config.max_attempts > 1 {
                warn!(attempts = config.max_attempts, error = %err, "Retry budget exhausted");
            }
            return (Err(err), stats);
        }

        let delay = config.calculate_delay(attempt);
        stats.total_delay += delay;
        warn!(
            attempt = attempt + 1,
            max_attempts = config.max_attempts,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Fetch attempt failed, retrying"
        );

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
