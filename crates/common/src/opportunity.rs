//! Scored trade candidates produced by strategies.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::Side;

pub const DEFAULT_CORRELATION_GROUP: &str = "general";

/// The closed set of signal generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyKind {
    Fundamental,
    Momentum,
    Sentiment,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Fundamental,
        StrategyKind::Momentum,
        StrategyKind::Sentiment,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Fundamental => "Fundamental",
            StrategyKind::Momentum => "Momentum",
            StrategyKind::Sentiment => "Sentiment",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unvalidated opportunity fields. Turned into a [`MarketOpportunity`] by
/// clamping every bounded value.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOpportunity {
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub edge: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default = "default_side", deserialize_with = "lenient_side")]
    pub side: Side,
    #[serde(default)]
    pub entry_price: i64,
    #[serde(default)]
    pub suggested_size: i64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub liquidity_score: f64,
    #[serde(default)]
    pub probability: f64,
    #[serde(default)]
    pub correlation_group: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<StrategyKind>,
}

impl Default for NewOpportunity {
    fn default() -> Self {
        Self {
            ticker: String::new(),
            title: String::new(),
            edge: 0.0,
            confidence: 0.0,
            side: Side::Yes,
            entry_price: 0,
            suggested_size: 0,
            reasoning: String::new(),
            liquidity_score: 0.0,
            probability: 0.0,
            correlation_group: String::new(),
            timestamp: Utc::now(),
            sources: Vec::new(),
        }
    }
}

fn default_side() -> Side {
    Side::Yes
}

fn lenient_side<'de, D: Deserializer<'de>>(de: D) -> Result<Side, D::Error> {
    let raw = Option::<String>::deserialize(de)?;
    Ok(raw.map(|s| Side::parse_lenient(&s)).unwrap_or(Side::Yes))
}

/// A scored trading candidate.
///
/// Bounded fields are clamped on construction and on deserialization:
/// confidence, probability and liquidity in [0, 1], entry price in [0, 100],
/// edge and size non-negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "NewOpportunity")]
pub struct MarketOpportunity {
    ticker: String,
    title: String,
    edge: f64,
    confidence: f64,
    side: Side,
    entry_price: i64,
    suggested_size: u64,
    reasoning: String,
    liquidity_score: f64,
    probability: f64,
    correlation_group: String,
    timestamp: DateTime<Utc>,
    sources: Vec<StrategyKind>,
}

impl From<NewOpportunity> for MarketOpportunity {
    fn from(raw: NewOpportunity) -> Self {
        let correlation_group = if raw.correlation_group.trim().is_empty() {
            DEFAULT_CORRELATION_GROUP.to_string()
        } else {
            raw.correlation_group
        };
        Self {
            ticker: raw.ticker,
            title: raw.title,
            edge: non_negative(raw.edge),
            confidence: unit(raw.confidence),
            side: raw.side,
            entry_price: raw.entry_price.clamp(0, 100),
            suggested_size: raw.suggested_size.max(0) as u64,
            reasoning: raw.reasoning,
            liquidity_score: unit(raw.liquidity_score),
            probability: unit(raw.probability),
            correlation_group,
            timestamp: raw.timestamp,
            sources: raw.sources,
        }
    }
}

fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.max(0.0)
    }
}

impl MarketOpportunity {
    pub fn new(raw: NewOpportunity) -> Self {
        raw.into()
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn edge(&self) -> f64 {
        self.edge
    }
    pub fn confidence(&self) -> f64 {
        self.confidence
    }
    pub fn side(&self) -> Side {
        self.side
    }
    pub fn entry_price(&self) -> i64 {
        self.entry_price
    }
    pub fn suggested_size(&self) -> u64 {
        self.suggested_size
    }
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }
    pub fn liquidity_score(&self) -> f64 {
        self.liquidity_score
    }
    pub fn probability(&self) -> f64 {
        self.probability
    }
    pub fn correlation_group(&self) -> &str {
        &self.correlation_group
    }
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
    pub fn sources(&self) -> &[StrategyKind] {
        &self.sources
    }

    /// `edge × confidence × liquidity`.
    pub fn score(&self) -> f64 {
        self.edge * self.confidence * self.liquidity_score
    }

    /// Ranking key used when picking which opportunities to execute.
    pub fn rank_key(&self) -> f64 {
        self.edge * self.confidence
    }

    /// Expected profit per contract in cents.
    pub fn expected_value(&self) -> f64 {
        let price = self.entry_price as f64;
        let (win_prob, payout) = match self.side {
            Side::Yes => (self.probability, 100.0 - price),
            Side::No => (1.0 - self.probability, price),
        };
        win_prob * payout - (1.0 - win_prob) * price
    }

    pub fn is_neutral(&self) -> bool {
        self.edge <= 0.0
    }

    pub fn with_suggested_size(mut self, contracts: u64) -> Self {
        self.suggested_size = contracts;
        self
    }

    /// Scale edge and confidence by a strategy weight, keeping confidence in [0, 1].
    pub fn apply_weight(&mut self, weight: f64) {
        let weight = non_negative(weight);
        self.edge = non_negative(self.edge * weight);
        self.confidence = unit(self.confidence * weight);
    }

    pub fn prefix_reasoning(&mut self, prefix: &str) {
        self.reasoning = format!("{}{}", prefix, self.reasoning);
    }
}

impl PartialEq for MarketOpportunity {
    fn eq(&self, other: &Self) -> bool {
        self.ticker == other.ticker && self.side == other.side && self.timestamp == other.timestamp
    }
}

impl Eq for MarketOpportunity {}

impl Hash for MarketOpportunity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ticker.hash(state);
        self.side.hash(state);
        self.timestamp.hash(state);
    }
}
