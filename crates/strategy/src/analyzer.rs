use std::collections::BTreeMap;

use async_trait::async_trait;
use common::{MarketInfo, MarketOpportunity, OrderBook, Result, StrategyKind};
use serde::{Deserialize, Serialize};

/// Numeric overrides for a strategy's thresholds, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyParams(BTreeMap<String, f64>);

impl StrategyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied().filter(|v| v.is_finite())
    }

    /// Override if present, else the configured value.
    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).unwrap_or(default)
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.0.insert(key.to_string(), value);
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.set(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A signal generator over one market snapshot.
///
/// `Ok(None)` means no signal. Errors are reserved for failures the caller
/// should log, never for "nothing to trade".
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn analyze(
        &self,
        market: &MarketInfo,
        book: &OrderBook,
        params: &StrategyParams,
    ) -> Result<Option<MarketOpportunity>>;
}

/// Adaptive feedback consulted on every analysis and fed on every resolved trade.
pub trait WeightSource: Send + Sync {
    /// Multiplier on the static weight, nominally 1.0.
    fn weight(&self, kind: StrategyKind) -> f64;

    fn params(&self, kind: StrategyKind) -> StrategyParams;

    /// `pnl > 0` is a win, anything else a loss.
    fn record_outcome(&self, ticker: &str, kind: StrategyKind, pnl: f64, note: &str) -> Result<()>;
}

/// Weight source that never adapts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralWeights;

impl WeightSource for NeutralWeights {
    fn weight(&self, _kind: StrategyKind) -> f64 {
        1.0
    }

    fn params(&self, _kind: StrategyKind) -> StrategyParams {
        StrategyParams::default()
    }

    fn record_outcome(&self, _ticker: &str, _kind: StrategyKind, _pnl: f64, _note: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_override_and_default() {
        let params = StrategyParams::new().with("min_edge", 0.4);
        assert_eq!(params.get_or("min_edge", 0.1), 0.4);
        assert_eq!(params.get_or("max_spread_pct", 0.05), 0.05);
    }

    #[test]
    fn test_params_ignore_non_finite() {
        let params = StrategyParams::new().with("min_edge", f64::NAN);
        assert_eq!(params.get_or("min_edge", 0.1), 0.1);
    }

    #[test]
    fn test_params_serialize_as_plain_map() {
        let params = StrategyParams::new().with("sentiment_threshold", 0.35);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"sentiment_threshold":0.35}"#);
    }
}
