//! The trading loop: scan, analyze, size, rank, execute, report.

pub mod engine;
pub mod performance;
pub mod types;

pub use engine::TradingEngine;
pub use performance::TradePerformance;
pub use types::{
    CycleReport, ExecutionOutcome, ExecutionRecord, ExecutionStats, Fill, HealthReport,
    HealthStatus, PerformanceReport,
};
