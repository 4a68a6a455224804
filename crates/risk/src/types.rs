use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::Side;
use serde::Serialize;
use thiserror::Error;

/// Account state the sizing rules are evaluated against, in USD.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PortfolioSnapshot {
    pub balance: f64,
    pub active_exposure: f64,
}

impl PortfolioSnapshot {
    pub fn equity(&self) -> f64 {
        self.balance + self.active_exposure
    }
}

/// An open exposure held by the bot.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub ticker: String,
    pub side: Side,
    pub size: u64,
    /// Cents paid per contract on `side`.
    pub entry_price: i64,
    pub entry_time: DateTime<Utc>,
    pub correlation_group: String,
    /// Latest YES mark in cents.
    pub current_price: f64,
    /// USD.
    pub unrealized_pnl: f64,
}

impl Position {
    /// Cost basis in USD.
    pub fn exposure(&self) -> f64 {
        self.size as f64 * self.entry_price as f64 / 100.0
    }

    /// Latest mark for the held side, in whole cents.
    pub fn side_mark(&self) -> i64 {
        let side_value = match self.side {
            Side::Yes => self.current_price,
            Side::No => 100.0 - self.current_price,
        };
        side_value.round().clamp(0.0, 100.0) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub ticker: String,
    pub side: Side,
    pub size: u64,
    pub entry_price: i64,
    pub exit_price: Option<i64>,
    pub pnl: Option<f64>,
    pub risk_level: RiskLevel,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCircuit {
    DailyLoss,
    Drawdown,
    Frequency,
}

/// Why a trade was sized to zero.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    #[error("{0:?} circuit breaker tripped")]
    CircuitOpen(RiskCircuit),
    #[error("edge {edge:.2} below floor {min:.2}")]
    EdgeTooLow { edge: f64, min: f64 },
    #[error("confidence {confidence:.2} below floor {min:.2}")]
    ConfidenceTooLow { confidence: f64, min: f64 },
    #[error("liquidity {liquidity:.2} below floor {min:.2}")]
    LiquidityTooLow { liquidity: f64, min: f64 },
    #[error("cooldown active, {remaining_secs}s remaining")]
    Cooldown { remaining_secs: u64 },
    #[error("entry price {0} outside (0, 100)")]
    InvalidPrice(i64),
    #[error("non-positive Kelly fraction {0:.4}")]
    NonPositiveKelly(f64),
    #[error("correlation group '{0}' at concentration cap")]
    ConcentrationLimit(String),
    #[error("sized below one contract")]
    BelowMinimumSize,
}

impl RiskRejection {
    /// Stable label for counters.
    pub fn kind(&self) -> &'static str {
        match self {
            RiskRejection::CircuitOpen(_) => "circuit_open",
            RiskRejection::EdgeTooLow { .. } => "edge_too_low",
            RiskRejection::ConfidenceTooLow { .. } => "confidence_too_low",
            RiskRejection::LiquidityTooLow { .. } => "liquidity_too_low",
            RiskRejection::Cooldown { .. } => "cooldown",
            RiskRejection::InvalidPrice(_) => "invalid_price",
            RiskRejection::NonPositiveKelly(_) => "non_positive_kelly",
            RiskRejection::ConcentrationLimit(_) => "concentration_limit",
            RiskRejection::BelowMinimumSize => "below_minimum_size",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CircuitStates {
    pub daily_loss: bool,
    pub drawdown: bool,
    pub frequency: bool,
}

impl CircuitStates {
    pub fn first_tripped(&self) -> Option<RiskCircuit> {
        if self.daily_loss {
            Some(RiskCircuit::DailyLoss)
        } else if self.drawdown {
            Some(RiskCircuit::Drawdown)
        } else if self.frequency {
            Some(RiskCircuit::Frequency)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeCounts {
    pub last_hour: usize,
    pub last_day: usize,
    pub total_history: usize,
}

/// Read-only snapshot of risk state.
#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub circuit_breakers: CircuitStates,
    pub daily_pnl: f64,
    pub weekly_pnl: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub peak_equity: f64,
    pub current_drawdown: f64,
    pub intraday_drawdown: f64,
    pub volatility_estimate: f64,
    pub active_positions: usize,
    pub active_exposure: f64,
    pub concentration: BTreeMap<String, f64>,
    pub trade_counts: TradeCounts,
    pub rejections: BTreeMap<String, u64>,
}
