//! Mispricing of the quoted asks against a fair value built from the
//! mid, the book imbalance, and the last trade.

use async_trait::async_trait;
use common::config::FundamentalConfig;
use common::{MarketInfo, MarketOpportunity, NewOpportunity, OrderBook, Result, Side, StrategyKind};
use tracing::{debug, info};

use crate::analyzer::{Strategy, StrategyParams};
use crate::signals;

const IMBALANCE_WEIGHT: f64 = 0.4;
const LAST_PRICE_WEIGHT: f64 = 0.3;
const VOLUME_FOR_FULL_CONFIDENCE: f64 = 10_000.0;

pub struct FundamentalStrategy {
    config: FundamentalConfig,
}

impl FundamentalStrategy {
    pub fn new(config: FundamentalConfig) -> Self {
        Self { config }
    }

    /// YES probability implied by the quotes, in [0.01, 0.99] before the last-trade blend.
    pub fn fair_probability(market: &MarketInfo, book: &OrderBook) -> f64 {
        let imbalance = signals::bid_share_imbalance(book, signals::IMBALANCE_DEPTH).unwrap_or(0.0);
        let mut fair = (market.mid_price() + imbalance * IMBALANCE_WEIGHT).clamp(0.01, 0.99);
        if market.last_price > 0 {
            fair = (1.0 - LAST_PRICE_WEIGHT) * fair
                + LAST_PRICE_WEIGHT * market.last_price as f64 / 100.0;
        }
        fair
    }

    fn confidence(&self, market: &MarketInfo, spread_pct: f64, fair: f64, boost: f64) -> f64 {
        let spread_factor = 1.0 - (spread_pct * 5.0).min(0.5);
        let volume_factor = (market.volume.max(0) as f64 / VOLUME_FOR_FULL_CONFIDENCE).min(1.0);
        let distance = (fair - 0.5).abs() * 2.0;
        (spread_factor * volume_factor * distance * boost).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl Strategy for FundamentalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fundamental
    }

    async fn analyze(
        &self,
        market: &MarketInfo,
        book: &OrderBook,
        params: &StrategyParams,
    ) -> Result<Option<MarketOpportunity>> {
        let min_edge = params.get_or("min_edge", self.config.min_edge);
        let min_liquidity = params.get_or("min_liquidity", self.config.min_liquidity);
        let max_spread_pct = params.get_or("max_spread_pct", self.config.max_spread_pct);
        let boost = params.get_or("confidence_boost_factor", self.config.confidence_boost_factor);
        let ticker = &market.ticker;

        let spread_pct = if market.yes_bid > 0 {
            (market.yes_ask - market.yes_bid) as f64 / 100.0
        } else {
            1.0
        };
        if spread_pct > max_spread_pct {
            debug!("Fundamental: {} spread too wide ({:.1}%)", ticker, spread_pct * 100.0);
            return Ok(None);
        }

        let fair = Self::fair_probability(market, book);
        let yes_ask = signals::quoted_ask(market, Side::Yes);
        let no_ask = signals::quoted_ask(market, Side::No);
        let yes_edge = fair * 100.0 - yes_ask as f64;
        let no_edge = (1.0 - fair) * 100.0 - no_ask as f64;

        let (side, edge, entry_price) = if yes_edge >= no_edge {
            (Side::Yes, yes_edge, yes_ask)
        } else {
            (Side::No, no_edge, no_ask)
        };
        if edge < min_edge {
            return Ok(None);
        }

        let liquidity = signals::liquidity_score(market, book);
        if liquidity < min_liquidity {
            debug!("Fundamental: {} liquidity too low ({:.2})", ticker, liquidity);
            return Ok(None);
        }

        let confidence = self.confidence(market, spread_pct, fair, boost);
        let probability = match side {
            Side::Yes => fair,
            Side::No => 1.0 - fair,
        };

        info!(
            "Fundamental: {} | {} @ {}¢ | edge={:.2} fair={:.3} conf={:.3}",
            ticker, side, entry_price, edge, fair, confidence
        );

        Ok(Some(MarketOpportunity::new(NewOpportunity {
            ticker: ticker.clone(),
            title: market.title.clone(),
            edge,
            confidence,
            side,
            entry_price,
            suggested_size: 1,
            reasoning: format!(
                "Fundamental: fair={:.1}%, spread={:.1}%",
                fair * 100.0,
                spread_pct * 100.0
            ),
            liquidity_score: liquidity,
            probability,
            correlation_group: signals::correlation_group(ticker),
            sources: vec![StrategyKind::Fundamental],
            ..Default::default()
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::FundamentalConfig;

    fn market(yes_bid: i64, yes_ask: i64, no_ask: i64, last: i64, volume: i64) -> MarketInfo {
        MarketInfo {
            ticker: "KXECON-25".into(),
            title: "Economy grows".into(),
            status: "open".into(),
            yes_bid,
            yes_ask,
            no_bid: 100 - yes_ask,
            no_ask,
            last_price: last,
            volume,
            ..Default::default()
        }
    }

    fn strategy() -> FundamentalStrategy {
        FundamentalStrategy::new(FundamentalConfig::default())
    }

    #[tokio::test]
    async fn test_no_side_edge_on_cheap_no() {
        let m = market(40, 42, 58, 41, 10_000);
        let opp = strategy()
            .analyze(&m, &OrderBook::empty(&m.ticker), &StrategyParams::default())
            .await
            .unwrap()
            .expect("signal");

        assert_eq!(opp.side(), Side::No);
        assert_eq!(opp.entry_price(), 58);
        assert!((opp.edge() - 1.0).abs() < 1e-9);
        assert!((opp.probability() - 0.59).abs() < 1e-9);
        assert!((opp.confidence() - 0.243).abs() < 1e-9);
        assert!((opp.liquidity_score() - 0.6).abs() < 1e-9);
        assert_eq!(opp.correlation_group(), "macro");
        assert_eq!(opp.sources(), &[StrategyKind::Fundamental]);
    }

    #[tokio::test]
    async fn test_wide_spread_rejected() {
        let m = market(30, 42, 58, 41, 10_000);
        let opp = strategy()
            .analyze(&m, &OrderBook::empty(&m.ticker), &StrategyParams::default())
            .await
            .unwrap();
        assert!(opp.is_none());
    }

    #[tokio::test]
    async fn test_missing_bid_counts_as_full_spread() {
        let m = market(0, 42, 58, 41, 10_000);
        let opp = strategy()
            .analyze(&m, &OrderBook::empty(&m.ticker), &StrategyParams::default())
            .await
            .unwrap();
        assert!(opp.is_none());
    }

    #[tokio::test]
    async fn test_learned_min_edge_suppresses_signal() {
        let m = market(40, 42, 58, 41, 10_000);
        let params = StrategyParams::new().with("min_edge", 1.5);
        let opp = strategy()
            .analyze(&m, &OrderBook::empty(&m.ticker), &params)
            .await
            .unwrap();
        assert!(opp.is_none());
    }

    #[tokio::test]
    async fn test_illiquid_market_rejected() {
        let m = market(40, 42, 58, 41, 0);
        let opp = strategy()
            .analyze(&m, &OrderBook::empty(&m.ticker), &StrategyParams::default())
            .await
            .unwrap();
        assert!(opp.is_none());
    }

    #[test]
    fn test_fair_value_leans_with_bids() {
        let m = market(40, 42, 58, 0, 10_000);
        let book = OrderBook {
            ticker: m.ticker.clone(),
            yes: common::BookSide {
                bids: vec![common::PriceLevel { price: 40, count: 90 }],
                asks: vec![common::PriceLevel { price: 42, count: 10 }],
            },
            no: Default::default(),
        };
        // mid 0.41 + (0.9 - 0.5) × 0.4
        let fair = FundamentalStrategy::fair_probability(&m, &book);
        assert!((fair - 0.57).abs() < 1e-9);
    }
}
