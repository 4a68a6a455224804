//! Generic resilience building blocks: circuit breaking, two-tier caching,
//! outbound pacing, session pooling, retry with backoff, and metrics.

pub mod cache;
pub mod circuit_breaker;
pub mod metrics;
pub mod pool;
pub mod rate_limit;
pub mod retry;

pub use cache::{CacheStats, RemoteStore, TtlCache};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use metrics::{MetricStats, MetricsCollector, MetricsSummary};
pub use pool::{ConnectionPool, PooledSession};
pub use rate_limit::RateLimiter;
pub use retry::{retry_with_backoff, RetryPolicy};
