//! Position sizing and trading halts.
//!
//! Kelly-criterion sizing with fractional scaling, volatility and
//! concentration adjustments, plus daily-loss, drawdown, and trade-frequency
//! circuits. Pure in-memory computation; no I/O.

pub mod manager;
pub mod types;

pub use manager::RiskManager;
pub use types::{
    CircuitStates, PortfolioSnapshot, Position, RiskCircuit, RiskLevel, RiskRejection, RiskReport,
    TradeCounts, TradeRecord,
};
