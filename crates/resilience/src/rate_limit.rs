//! Outbound call pacing shared by every pipeline stage.
//!
//! A semaphore bounds calls in flight; a single-cell governor bucket enforces
//! the minimum spacing between consecutive call starts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::Error;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type SpacingLimiter = GovLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    spacing: Option<Arc<SpacingLimiter>>,
    max_concurrent: usize,
    min_interval: Duration,
}

impl RateLimiter {
    /// A zero `min_interval` disables spacing and keeps only the concurrency bound.
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let spacing = Quota::with_period(min_interval).map(|q| Arc::new(GovLimiter::direct(q)));

        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            spacing,
            max_concurrent,
            min_interval,
        }
    }

    /// Wait for a concurrency slot, then for the next spacing slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, Error> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("rate limiter closed".into()))?;
        if let Some(spacing) = &self.spacing {
            spacing.until_ready().await;
        }
        Ok(permit)
    }

    /// Run `op` under the limiter. The slot is held until `op` resolves.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let _permit = self.acquire().await?;
        op().await
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn test_enforces_min_spacing() {
        let limiter = RateLimiter::new(4, Duration::from_millis(40));
        let started = Instant::now();
        for _ in 0..4 {
            limiter.call(|| async { Ok::<_, Error>(()) }).await.unwrap();
        }
        // First call is immediate, the next three each wait one interval.
        assert!(started.elapsed() >= Duration::from_millis(110));
    }

    #[tokio::test]
    async fn test_bounds_concurrency() {
        let limiter = RateLimiter::new(2, Duration::ZERO);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .call(|| async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, Error>(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_disables_spacing() {
        let limiter = RateLimiter::new(1, Duration::ZERO);
        let started = Instant::now();
        for _ in 0..20 {
            limiter.call(|| async { Ok::<_, Error>(()) }).await.unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
