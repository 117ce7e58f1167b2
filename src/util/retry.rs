//! Retry with bounded exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::KestrelError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Wait after the first failure; also the lower bound of every wait.
    pub initial_backoff: Duration,
    /// Upper bound of every wait.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(16),
            multiplier: 2.0,
        }
    }
}

/// A failed attempt that is about to be retried.
#[derive(Debug)]
pub struct RetryEvent<'a> {
    /// 1-based number of the attempt that failed.
    pub attempt: u32,
    pub max_attempts: u32,
    pub error: &'a KestrelError,
    pub delay: Duration,
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let secs = secs
            .max(self.initial_backoff.as_secs_f64())
            .min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Execute an async operation, retrying transient errors.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, KestrelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, KestrelError>>,
    {
        self.execute_with(operation, KestrelError::is_retryable, |_| {})
            .await
    }

    /// Execute an async operation, retrying errors accepted by `should_retry`.
    ///
    /// Every retry is logged and reported to `on_retry` before sleeping.
    pub async fn execute_with<F, Fut, T, P, R>(
        &self,
        mut operation: F,
        should_retry: P,
        mut on_retry: R,
    ) -> Result<T, KestrelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, KestrelError>>,
        P: Fn(&KestrelError) -> bool,
        R: FnMut(&RetryEvent<'_>),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if attempt >= self.max_attempts || !should_retry(&error) {
                return Err(error);
            }

            let delay = self.backoff_for(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after error"
            );
            on_retry(&RetryEvent {
                attempt,
                max_attempts: self.max_attempts,
                error: &error,
                delay,
            });
            tokio::time::sleep(delay).await;
        }
    }
}
