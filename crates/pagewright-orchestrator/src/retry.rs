//! Retry with exponential backoff for remote calls.
//!
//! Only failures classified as transient by [`Retryable`] are retried.
//! Delays double from `initial_delay` and are capped at `max_delay`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use pagewright_github::GithubError;
use tracing::{info, warn};

use crate::error::PagewrightError;

/// Classifies errors for [`RetryPolicy::run`].
pub trait Retryable {
    /// Returns `true` if repeating the call may succeed.
    fn is_transient(&self) -> bool;
}

impl Retryable for PagewrightError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

impl Retryable for GithubError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the total attempt count.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the initial and maximum delay.
    #[must_use]
    pub const fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt - 1);
                    info!(
                        operation,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "Retrying after {:.1} seconds",
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(operation, attempts = attempt, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}
