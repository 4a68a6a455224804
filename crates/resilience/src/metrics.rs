//! Counters and windowed samples keyed by metric name.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub counters: BTreeMap<String, u64>,
    pub samples: BTreeMap<String, MetricStats>,
}

/// Cheap to clone; clones share the same maps.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    window: usize,
    samples: Arc<DashMap<String, VecDeque<f64>>>,
    counters: Arc<DashMap<String, u64>>,
}

impl MetricsCollector {
    /// Keep at most `window` samples per metric, oldest dropped first.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Arc::new(DashMap::new()),
            counters: Arc::new(DashMap::new()),
        }
    }

    pub fn record(&self, name: &str, value: f64) {
        let mut series = self.samples.entry(name.to_string()).or_default();
        if series.len() == self.window {
            series.pop_front();
        }
        series.push_back(value);
    }

    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, amount: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += amount;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|c| *c).unwrap_or(0)
    }

    /// Await `fut`, recording its wall time as `{name}_ms`.
    pub async fn time_operation<T, Fut>(&self, name: &str, fut: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        let out = fut.await;
        self.record(
            &format!("{}_ms", name),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        out
    }

    pub fn get_stats(&self, name: &str) -> Option<MetricStats> {
        let series = self.samples.get(name)?;
        stats_for(series.iter().copied())
    }

    pub fn summary(&self) -> MetricsSummary {
        let counters = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        let samples = self
            .samples
            .iter()
            .filter_map(|e| stats_for(e.value().iter().copied()).map(|s| (e.key().clone(), s)))
            .collect();
        MetricsSummary { counters, samples }
    }
}

fn stats_for(values: impl Iterator<Item = f64>) -> Option<MetricStats> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let pick = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
    Some(MetricStats {
        count: n,
        mean: sorted.iter().sum::<f64>() / n as f64,
        min: sorted[0],
        max: sorted[n - 1],
        p50: sorted[n / 2],
        p95: pick(0.95),
        p99: pick(0.99),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stats_percentiles() {
        let metrics = MetricsCollector::new(1000);
        for v in 1..=100 {
            metrics.record("latency", v as f64);
        }
        let s = metrics.get_stats("latency").unwrap();
        assert_eq!(s.count, 100);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 100.0);
        assert!((s.mean - 50.5).abs() < 1e-9);
        assert_eq!(s.p50, 51.0);
        assert_eq!(s.p95, 96.0);
        assert_eq!(s.p99, 100.0);
    }

    #[test]
    fn test_window_drops_oldest() {
        let metrics = MetricsCollector::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            metrics.record("x", v);
        }
        let s = metrics.get_stats("x").unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.min, 2.0);
        assert!(metrics.get_stats("unknown").is_none());
    }

    #[test]
    fn test_counters_and_summary() {
        let metrics = MetricsCollector::new(10);
        metrics.increment("orders");
        metrics.increment_by("orders", 2);
        metrics.record("scan_ms", 5.0);
        assert_eq!(metrics.counter("orders"), 3);
        assert_eq!(metrics.counter("missing"), 0);

        let summary = metrics.summary();
        assert_eq!(summary.counters["orders"], 3);
        assert_eq!(summary.samples["scan_ms"].count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_operation_records_duration() {
        let metrics = MetricsCollector::new(10);
        let out = metrics
            .time_operation("fetch", async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                7
            })
            .await;
        assert_eq!(out, 7);
        let s = metrics.get_stats("fetch_ms").unwrap();
        assert!(s.min >= 30.0);
    }
}
