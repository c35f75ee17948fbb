//! Bounded exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use patrol_core::{LlmConfig, PatrolError, ProviderError};
use tokio::time::sleep;
use tracing::warn;

/// Errors that know whether another attempt may succeed.
pub trait Retryable {
    /// Whether the failure is worth retrying.
    fn is_transient(&self) -> bool;

    /// Server-suggested wait, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ProviderError {
    fn is_transient(&self) -> bool {
        ProviderError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl Retryable for PatrolError {
    fn is_transient(&self) -> bool {
        PatrolError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PatrolError::Provider(e) => e.retry_after,
            _ => None,
        }
    }
}

/// How often and how patiently to retry a failing call.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use patrol_review::retry::RetryPolicy;
///
/// let policy = RetryPolicy {
///     max_retries: 3,
///     initial_backoff: Duration::from_millis(500),
///     max_backoff: Duration::from_secs(2),
/// };
/// assert_eq!(policy.backoff(0), Duration::from_millis(500));
/// assert_eq!(policy.backoff(1), Duration::from_secs(1));
/// assert_eq!(policy.backoff(5), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Ceiling for any single wait, including `Retry-After` hints.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Build the policy from the `[llm]` configuration section.
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Wait before retry number `retry` (0-based): `initial * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Wait before retry number `retry`, honoring a server hint up to the cap.
    pub fn delay_for<E: Retryable>(&self, retry: u32, err: &E) -> Duration {
        let base = self.backoff(retry);
        match err.retry_after() {
            Some(hint) => hint.max(base).min(self.max_backoff),
            None => base,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// # Errors
    ///
    /// Returns the first permanent error, or the last transient one once
    /// `max_retries` retries have been spent.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() || retry >= self.max_retries => return Err(err),
                Err(err) => {
                    let wait = self.delay_for(retry, &err);
                    warn!(
                        operation,
                        attempt = retry + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    sleep(wait).await;
                    retry += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}
