//! Reports and outcomes produced by the trading engine.

use chrono::{DateTime, Utc};
use common::{Side, StrategyKind};
use resilience::{BreakerState, CacheStats, MetricsSummary};
use risk::{CircuitStates, RiskReport};
use serde::Serialize;
use strategy::StrategyStats;
use uuid::Uuid;

use crate::performance::TradePerformance;

/// An order that was routed, or would have been in paper mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub price_cents: i64,
    pub count: u64,
    pub sources: Vec<StrategyKind>,
    pub at: DateTime<Utc>,
}

impl Fill {
    /// Cash paid in USD.
    pub fn cost(&self) -> f64 {
        self.count as f64 * self.price_cents as f64 / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Placed(Fill),
    Simulated(Fill),
    /// Refused before reaching the venue: zero size, bad price, or an open breaker.
    Rejected { ticker: String, reason: String },
    Failed { ticker: String, error: String },
}

impl ExecutionOutcome {
    pub fn fill(&self) -> Option<&Fill> {
        match self {
            ExecutionOutcome::Placed(fill) | ExecutionOutcome::Simulated(fill) => Some(fill),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.fill().is_some()
    }
}

/// One entry of the bounded execution history.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub fill: Fill,
    pub paper: bool,
    pub edge: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    pub recorded: usize,
    pub placed: u64,
    pub simulated: u64,
    pub rejected: u64,
    pub failed: u64,
    pub contracts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub scan_breaker: BreakerState,
    pub execution_breaker: BreakerState,
    pub risk_circuits: CircuitStates,
    pub cache_hit_rate: f64,
    pub remote_cache_latency_ms: Option<f64>,
    pub remote_cache_error: Option<String>,
    pub metrics: MetricsSummary,
}

/// Work done by one cycle so far.
#[derive(Debug, Clone, Default)]
pub(crate) struct CycleProgress {
    pub markets_scanned: usize,
    pub markets_analyzed: usize,
    pub opportunities: usize,
    pub executions: Vec<ExecutionOutcome>,
    pub positions_resolved: usize,
}

/// Simulated cash for paper trading: the first venue balance seen, plus
/// every simulated purchase and payout since.
#[derive(Debug, Default)]
pub(crate) struct PaperLedger {
    opening: Option<f64>,
    cash_flow: f64,
}

impl PaperLedger {
    pub fn balance(&mut self, venue_balance: f64) -> f64 {
        *self.opening.get_or_insert(venue_balance) + self.cash_flow
    }

    pub fn debit(&mut self, amount: f64) {
        self.cash_flow -= amount;
    }

    pub fn credit(&mut self, amount: f64) {
        self.cash_flow += amount;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub markets_scanned: usize,
    pub markets_analyzed: usize,
    pub opportunities: usize,
    pub executions: Vec<ExecutionOutcome>,
    pub positions_resolved: usize,
    pub timed_out: bool,
    pub cancelled: bool,
    pub health: HealthReport,
}

impl CycleReport {
    pub fn fills(&self) -> impl Iterator<Item = &Fill> {
        self.executions.iter().filter_map(ExecutionOutcome::fill)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub trades: TradePerformance,
    pub win_rate: f64,
    pub profit_factor: Option<f64>,
    pub execution: ExecutionStats,
    pub risk: RiskReport,
    pub strategies: StrategyStats,
    pub cache: CacheStats,
    pub metrics: MetricsSummary,
}
