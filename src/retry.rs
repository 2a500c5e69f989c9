//! Retry logic with exponential backoff
//!
//! Captioning calls are retried on transient failures only. Each attempt runs
//! under its own deadline; an attempt that outlives it counts as a transient
//! timeout. Delays grow geometrically, are capped at `max_delay` and may be
//! jittered so concurrent tasks do not retry in lockstep.
//!
//! # Example
//!
//! ```no_run
//! use gemini_caption::retry::{IsRetryable, call_with_retry};
//! use gemini_caption::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! impl From<std::time::Duration> for MyError {
//!     fn from(_: std::time::Duration) -> Self {
//!         MyError::Transient
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = call_with_retry(&config, || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::CaptionError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (rate limits, timeouts, connection resets, 5xx) return `true`.
/// Permanent failures (rejected request, bad credentials, blocked content) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for CaptionError {
    fn is_retryable(&self) -> bool {
        match self {
            CaptionError::RateLimited(_)
            | CaptionError::Timeout(_)
            | CaptionError::Network(_)
            | CaptionError::Unavailable(_) => true,
            CaptionError::InvalidRequest(_)
            | CaptionError::PermissionDenied(_)
            | CaptionError::QuotaExhausted(_)
            | CaptionError::Blocked(_)
            | CaptionError::MalformedResponse(_) => false,
        }
    }
}

impl From<Duration> for CaptionError {
    fn from(limit: Duration) -> Self {
        CaptionError::Timeout(format!("no response within {}s", limit.as_secs_f64()))
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// `config.max_attempts` is the total number of calls, so `1` disables retry.
/// An attempt exceeding `config.attempt_timeout` is dropped and converted into
/// an error through `E: From<Duration>`, which should be a retryable variant.
///
/// Returns the successful result or the last error after all attempts are exhausted.
pub async fn call_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display + From<Duration>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(config.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(E::from(config.attempt_timeout)),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(config, attempt);
                let delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::warn!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Un-jittered delay to wait after the given failed attempt (1-based)
///
/// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(64) as i32;
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        return config.max_delay;
    }
    Duration::from_secs_f64(secs)
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay,
/// so the result lies between `delay` and `2 * delay`.
pub fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
