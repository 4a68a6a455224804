//! Bounded pool of reusable session handles.
//!
//! `acquire` hands out an idle session, creates one while under the cap, and
//! queues once the cap is reached. Dropping the guard returns the session to
//! the idle queue. Sessions are cheap handles (an `Arc` around a client), so
//! the guard hands a clone back on drop.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use common::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type Factory<T> = dyn Fn() -> Result<T, Error> + Send + Sync;

struct PoolInner<T> {
    idle: Mutex<VecDeque<T>>,
    factory: Box<Factory<T>>,
    slots: Arc<Semaphore>,
    created: AtomicUsize,
    max_size: usize,
}

impl<T> PoolInner<T> {
    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ConnectionPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> ConnectionPool<T> {
    pub fn new<F>(max_size: usize, factory: F) -> Self
    where
        F: Fn() -> Result<T, Error> + Send + Sync + 'static,
    {
        let max_size = max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(VecDeque::new()),
                factory: Box::new(factory),
                slots: Arc::new(Semaphore::new(max_size)),
                created: AtomicUsize::new(0),
                max_size,
            }),
        }
    }

    pub async fn acquire(&self) -> Result<PooledSession<T>, Error> {
        let permit = self
            .inner
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("connection pool closed".into()))?;

        let reused = self.inner.lock_idle().pop_front();
        let session = match reused {
            Some(session) => session,
            None => {
                let session = (self.inner.factory)()?;
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                session
            }
        };

        Ok(PooledSession {
            session,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn idle_count(&self) -> usize {
        self.inner.lock_idle().len()
    }

    pub fn created_count(&self) -> usize {
        self.inner.created.load(Ordering::Relaxed)
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }
}

/// A checked-out session; released back to the pool on drop.
pub struct PooledSession<T: Clone> {
    session: T,
    pool: Arc<PoolInner<T>>,
    _permit: OwnedSemaphorePermit,
}

impl<T: Clone> Deref for PooledSession<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.session
    }
}

impl<T: Clone> Drop for PooledSession<T> {
    fn drop(&mut self) {
        // The session goes back before the permit is released so a waiter
        // woken by the permit finds it idle.
        self.pool.lock_idle().push_back(self.session.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn counting_pool(max: usize) -> ConnectionPool<usize> {
        let next = Arc::new(AtomicUsize::new(0));
        ConnectionPool::new(max, move || Ok(next.fetch_add(1, Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn test_reuses_idle_session() {
        let pool = counting_pool(2);
        let first = *pool.acquire().await.unwrap();
        let second = *pool.acquire().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.created_count(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_creates_up_to_max() {
        let pool = counting_pool(2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(*a, *b);
        assert_eq!(pool.created_count(), 2);
    }

    #[tokio::test]
    async fn test_blocks_when_exhausted() {
        let pool = counting_pool(1);
        let held = pool.acquire().await.unwrap();

        let waiter = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(waiter.is_err(), "second acquire should queue");

        let pool2 = pool.clone();
        let handle = tokio::spawn(async move { *pool2.acquire().await.unwrap() });
        drop(held);
        assert_eq!(handle.await.unwrap(), 0);
        assert_eq!(pool.created_count(), 1);
    }

    #[tokio::test]
    async fn test_guard_derefs_until_returned() {
        let pool = ConnectionPool::new(1, || Ok(Arc::new(String::from("session-a"))));
        let guard = pool.acquire().await.unwrap();
        assert_eq!(guard.as_str(), "session-a");
        let held: Arc<String> = (*guard).clone();
        assert_eq!(Arc::strong_count(&held), 2);
        assert_eq!(pool.idle_count(), 0);

        drop(guard);
        // One handle idle in the pool, one held here.
        assert_eq!(Arc::strong_count(&held), 2);
        assert_eq!(pool.idle_count(), 1);
        let again = pool.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&held, &*again));
        assert_eq!(pool.created_count(), 1);
    }

    #[tokio::test]
    async fn test_factory_error_releases_slot() {
        let pool: ConnectionPool<u8> =
            ConnectionPool::new(1, || Err(Error::Http("refused".into())));
        assert!(pool.acquire().await.is_err());
        assert!(pool.acquire().await.is_err());
        assert_eq!(pool.created_count(), 0);
    }
}
