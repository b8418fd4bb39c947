//! Retry with exponential backoff for remote calls.
//!
//! A [`RetryPolicy`] bundles the attempt limit, the backoff function and the
//! error classification. Only errors classified as
//! [`ErrorClass::Transient`] are retried; permanent errors are returned on
//! the first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::errors::{ErrorClass, RemoteError};

/// Errors the retry loop knows how to classify.
pub trait Retryable: std::fmt::Display {
    fn class(&self) -> ErrorClass;

    /// Server-requested delay before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for RemoteError {
    fn class(&self) -> ErrorClass {
        RemoteError::class(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        RemoteError::retry_after(self)
    }
}

/// Attempt limit and backoff curve for one kind of operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Add up to 25% random delay to each wait.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build a policy from the `[sync.retry]` section.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            factor: config.factor,
            jitter: true,
        }
    }

    /// Backoff before retry number `retry` (0-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn delay_for<E: Retryable>(&self, retry: u32, err: &E) -> Duration {
        // A server-requested wait is still bounded by `max_delay`.
        if let Some(requested) = err.retry_after() {
            return requested.min(self.max_delay);
        }
        let base = self.backoff(retry);
        if self.jitter && !base.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..=0.25);
            base.mul_f64(1.0 + extra).min(self.max_delay)
        } else {
            base
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the retry budget
/// is spent. The last error is returned.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut retries = 0u32;

    loop {
        match operation().await {
            Ok(val) => {
                if retries > 0 {
                    info!(operation = operation_name, retries, "operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                if err.class() == ErrorClass::Permanent {
                    return Err(err);
                }
                if retries >= policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = retries + 1,
                        error = %err,
                        "giving up after transient failures"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for(retries, &err);
                retries += 1;
                warn!(
                    operation = operation_name,
                    attempt = retries,
                    max_retries = policy.max_retries,
                    error = %err,
                    ?delay,
                    "transient failure, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
