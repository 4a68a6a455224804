//! Per-operation circuit breaker: `closed → open → half-open → closed`.
//!
//! State lives behind one mutex per breaker. The lock is only held to decide
//! admission and to record the outcome, never across the protected call.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use common::Error;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "half-open")]
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Admission ticket for one call. Only a trial's outcome moves the
/// breaker out of half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Arc::new(Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    /// Run `op` if the breaker admits it, recording the outcome.
    ///
    /// Rejected calls return [`Error::CircuitOpen`] without running `op`.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let admission = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let result = op().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(admission),
            Err(e) => self.on_failure(admission, e),
        }
        result
    }

    fn admit(&self) -> Result<Admission, Error> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => {
                let recovered = inner
                    .opened_at
                    .map(|t| t.elapsed() > self.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("Circuit '{}' half-open, admitting trial call", self.name);
                    Ok(Admission::Trial)
                } else {
                    Err(Error::CircuitOpen(self.name.clone()))
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(Error::CircuitOpen(self.name.clone()))
                } else {
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match (inner.state, admission) {
            (BreakerState::HalfOpen, Admission::Trial) => {
                info!("Circuit '{}' closed after successful trial", self.name);
                inner.state = BreakerState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
            }
            (BreakerState::Closed, _) => inner.failures = 0,
            // Stragglers admitted before the breaker opened.
            (BreakerState::HalfOpen, Admission::Normal) | (BreakerState::Open, _) => {}
        }
    }

    fn on_failure(&self, admission: Admission, err: &Error) {
        let mut inner = self.lock();
        match (inner.state, admission) {
            (BreakerState::HalfOpen, Admission::Trial) => {
                warn!("Circuit '{}' trial failed, reopening: {}", self.name, err);
                self.trip(&mut inner);
            }
            (BreakerState::Closed, _) => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    warn!(
                        "Circuit '{}' opened after {} consecutive failures: {}",
                        self.name, inner.failures, err
                    );
                    self.trip(&mut inner);
                }
            }
            // A call admitted while closed can finish after another call tripped it.
            (BreakerState::HalfOpen, Admission::Normal) | (BreakerState::Open, _) => {}
        }
    }

    fn trip(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reopens the breaker if a trial future is dropped before it completes.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.lock();
            if inner.state == BreakerState::HalfOpen {
                self.breaker.trip(&mut inner);
            }
        }
    }
}
