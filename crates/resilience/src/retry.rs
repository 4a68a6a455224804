//! Retry with exponential backoff for transient and rate-limit failures.

use std::future::Future;
use std::time::Duration;

use common::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first transient failure; doubled per attempt.
    pub base_delay: Duration,
    /// Delay after the first 429; doubled per attempt.
    pub rate_limit_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32, err: &Error) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        match err {
            Error::RateLimited { retry_after_ms } => self
                .rate_limit_delay
                .saturating_mul(factor)
                .max(Duration::from_millis(*retry_after_ms)),
            _ => self.base_delay.saturating_mul(factor),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds, fails terminally, or attempts run out.
///
/// Non-retryable errors return immediately. Backoff sleeps end early with
/// [`Error::Cancelled`] when `cancel` fires.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        attempt += 1;
        if !err.is_retryable() {
            debug!("{}: not retrying: {}", label, err);
            return Err(err);
        }
        if attempt >= attempts {
            warn!("{}: giving up after {} attempts: {}", label, attempt, err);
            return Err(err);
        }

        let delay = policy.delay_for(attempt - 1, &err);
        debug!(
            "{}: attempt {}/{} failed ({}), retrying in {:?}",
            label, attempt, attempts, err, delay
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
