//! Two-tier TTL cache: an optional shared remote store in front of a bounded
//! local map.
//!
//! Remote failures never reach the caller. Reads fall through to the local
//! map and writes always land locally, so losing the remote store degrades
//! the cache to process-local operation instead of failing requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::Error;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shared key/value backend with TTL support.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error>;
    async fn delete(&self, key: &str) -> Result<(), Error>;
    /// One slot per requested key, `None` where the key is absent.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, Error>;
    async fn ping(&self) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: Value,
    expires_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub local_entries: usize,
    pub remote_enabled: bool,
    pub remote_errors: u64,
}

pub struct TtlCache {
    local: DashMap<String, LocalEntry>,
    remote: Option<Arc<dyn RemoteStore>>,
    default_ttl: Duration,
    capacity: usize,
    remote_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    remote_errors: AtomicU64,
    remote_degraded: AtomicBool,
}

impl TtlCache {
    pub fn new(default_ttl: Duration, capacity: usize, remote_timeout: Duration) -> Self {
        Self {
            local: DashMap::new(),
            remote: None,
            default_ttl,
            capacity: capacity.max(1),
            remote_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            remote_errors: AtomicU64::new(0),
            remote_degraded: AtomicBool::new(false),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(raw) = self.remote_get(key).await {
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
                Err(e) => debug!("Undecodable remote cache value for {}: {}", key, e),
            }
        }

        let found = self.local_get(key, Instant::now());
        self.count(found.is_some());
        found
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);

        if let Some(remote) = &self.remote {
            let raw = value.to_string();
            let outcome =
                tokio::time::timeout(self.remote_timeout, remote.set_ex(key, &raw, ttl)).await;
            self.observe_remote(key, "set", flatten(outcome));
        }

        self.local.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        self.evict_over_capacity();
    }

    pub async fn delete(&self, key: &str) {
        if let Some(remote) = &self.remote {
            let outcome = tokio::time::timeout(self.remote_timeout, remote.delete(key)).await;
            self.observe_remote(key, "delete", flatten(outcome));
        }
        self.local.remove(key);
    }

    /// Batched lookup. Keys missing remotely are served from the local map.
    pub async fn get_many(&self, keys: &[String]) -> HashMap<String, Value> {
        let mut found = HashMap::new();

        if let Some(remote) = &self.remote {
            let outcome = tokio::time::timeout(self.remote_timeout, remote.mget(keys)).await;
            if let Some(values) = self.observe_remote("<mget>", "mget", flatten(outcome)) {
                for (key, raw) in keys.iter().zip(values) {
                    if let Some(value) = raw.and_then(|r| serde_json::from_str(&r).ok()) {
                        found.insert(key.clone(), value);
                    }
                }
            }
        }

        let now = Instant::now();
        for key in keys {
            if found.contains_key(key) {
                self.count(true);
                continue;
            }
            let local = self.local_get(key, now);
            self.count(local.is_some());
            if let Some(value) = local {
                found.insert(key.clone(), value);
            }
        }
        found
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Cached value for {} has unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v, ttl).await,
            Err(e) => warn!("Failed to encode cache value for {}: {}", key, e),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            local_entries: self.local.len(),
            remote_enabled: self.remote.is_some(),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
        }
    }

    /// Round-trip latency to the remote store, `None` when running local-only.
    pub async fn remote_latency(&self) -> Option<Result<Duration, Error>> {
        let remote = self.remote.as_ref()?;
        let started = Instant::now();
        let outcome = flatten(tokio::time::timeout(self.remote_timeout, remote.ping()).await);
        Some(outcome.map(|_| started.elapsed()))
    }

    async fn remote_get(&self, key: &str) -> Option<String> {
        let remote = self.remote.as_ref()?;
        let outcome = tokio::time::timeout(self.remote_timeout, remote.get(key)).await;
        self.observe_remote(key, "get", flatten(outcome)).flatten()
    }

    fn local_get(&self, key: &str, now: Instant) -> Option<Value> {
        if let Some(entry) = self.local.get(key) {
            if now < entry.expires_at {
                return Some(entry.value.clone());
            }
        }
        self.local.remove_if(key, |_, entry| now >= entry.expires_at);
        None
    }

    /// Drop entries nearest expiry until the map fits its capacity.
    fn evict_over_capacity(&self) {
        while self.local.len() > self.capacity {
            let victim = self
                .local
                .iter()
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());
            match victim {
                Some(k) => {
                    self.local.remove(&k);
                }
                None => break,
            }
        }
    }

    /// Swallow a remote outcome, tracking degradation transitions.
    fn observe_remote<T>(&self, key: &str, op: &str, outcome: Result<T, Error>) -> Option<T> {
        match outcome {
            Ok(v) => {
                if self.remote_degraded.swap(false, Ordering::Relaxed) {
                    info!("Remote cache recovered");
                }
                Some(v)
            }
            Err(e) => {
                self.remote_errors.fetch_add(1, Ordering::Relaxed);
                if !self.remote_degraded.swap(true, Ordering::Relaxed) {
                    warn!("Remote cache unavailable, serving locally: {}", e);
                } else {
                    debug!("Remote cache {} failed for {}: {}", op, key, e);
                }
                None
            }
        }
    }

    fn count(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn flatten<T>(
    outcome: Result<Result<T, Error>, tokio::time::error::Elapsed>,
) -> Result<T, Error> {
    outcome.map_err(|_| Error::Timeout("remote cache".into()))?
}
