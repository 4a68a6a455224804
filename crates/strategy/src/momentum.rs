//! Trend following over per-ticker price and volume history, confirmed
//! by order flow.

use std::collections::VecDeque;

use async_trait::async_trait;
use common::config::MomentumConfig;
use common::{MarketInfo, MarketOpportunity, NewOpportunity, OrderBook, Result, Side, StrategyKind};
use dashmap::DashMap;
use tracing::info;

use crate::analyzer::{Strategy, StrategyParams};
use crate::signals;

const MIN_PRICES: usize = 3;
const WHALE_DEPTH: usize = 3;
const WHALE_SIGNAL: f64 = 0.2;
const SIGNAL_CAP: f64 = 0.5;

#[derive(Debug, Default)]
struct History {
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
}

/// Component signals behind one momentum reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumReading {
    pub price: f64,
    pub volume: f64,
    pub flow: f64,
}

pub struct MomentumStrategy {
    config: MomentumConfig,
    history: DashMap<String, History>,
}

impl MomentumStrategy {
    pub fn new(config: MomentumConfig) -> Self {
        Self {
            config,
            history: DashMap::new(),
        }
    }

    fn capacity(&self) -> usize {
        (self.config.lookback_periods * 2).max(MIN_PRICES)
    }

    /// Observations required before a ticker can signal.
    fn min_history(&self) -> usize {
        self.config.lookback_periods.max(MIN_PRICES)
    }

    /// Append an observation and return copies of the updated series.
    fn observe(&self, ticker: &str, price: f64, volume: f64) -> (Vec<f64>, Vec<f64>) {
        let capacity = self.capacity();
        let mut entry = self.history.entry(ticker.to_string()).or_default();
        let h = entry.value_mut();
        if h.prices.len() >= capacity {
            h.prices.pop_front();
        }
        if h.volumes.len() >= capacity {
            h.volumes.pop_front();
        }
        h.prices.push_back(price);
        h.volumes.push_back(volume);
        (
            h.prices.iter().copied().collect(),
            h.volumes.iter().copied().collect(),
        )
    }

    /// Drop history for one ticker, or all tickers.
    pub fn clear_history(&self, ticker: Option<&str>) {
        match ticker {
            Some(t) => {
                self.history.remove(t);
            }
            None => self.history.clear(),
        }
    }

    pub fn tracked_tickers(&self) -> usize {
        self.history.len()
    }

    /// Book mid, then market mid, then last trade.
    fn current_price(market: &MarketInfo, book: &OrderBook) -> f64 {
        book.mid_probability().unwrap_or_else(|| market.mid_price())
    }

    fn price_momentum(prices: &[f64]) -> f64 {
        let n = prices.len();
        if n < MIN_PRICES {
            return 0.0;
        }
        let last = prices[n - 1];
        let third_last = prices[n - 3];
        let short = if third_last != 0.0 {
            (last - third_last) / third_last
        } else {
            0.0
        };
        let medium = if prices[0] != 0.0 {
            (last - prices[0]) / n as f64
        } else {
            0.0
        };
        0.7 * short + 0.3 * medium
    }

    /// Current volume relative to the mean of earlier readings; neutral
    /// until a full lookback window exists.
    fn volume_momentum(volumes: &[f64], lookback: usize) -> f64 {
        if volumes.len() < lookback {
            return 1.0;
        }
        let Some((current, previous)) = volumes.split_last() else {
            return 1.0;
        };
        if previous.is_empty() {
            return 1.0;
        }
        let avg = previous.iter().sum::<f64>() / previous.len() as f64;
        if avg > 0.0 {
            current / avg
        } else {
            1.0
        }
    }

    fn flow_signal(book: &OrderBook) -> f64 {
        if book.yes.bids.is_empty() || book.yes.asks.is_empty() {
            return 0.0;
        }
        let imbalance = signals::flow_imbalance(book, signals::FLOW_DEPTH);
        let top = |levels: &[common::PriceLevel]| {
            levels.iter().take(WHALE_DEPTH).map(|l| l.count).max().unwrap_or(0)
        };
        let whale_bid = top(&book.yes.bids);
        let whale_ask = top(&book.yes.asks);
        let whale = if whale_bid > whale_ask * 2 {
            WHALE_SIGNAL
        } else if whale_ask > whale_bid * 2 {
            -WHALE_SIGNAL
        } else {
            0.0
        };
        imbalance * 0.8 + whale * 0.2
    }

    fn combine(reading: MomentumReading, volume_threshold: f64) -> f64 {
        let mut price = reading.price;
        if reading.volume < volume_threshold && volume_threshold > 0.0 {
            price *= reading.volume / volume_threshold;
        }
        let combined = 0.5 * price + 0.3 * reading.flow + 0.2 * (reading.volume - 1.0) * 0.1;
        combined.clamp(-SIGNAL_CAP, SIGNAL_CAP)
    }

    fn confidence(reading: MomentumReading, volume_threshold: f64) -> f64 {
        let agree = (reading.price > 0.0 && reading.flow > 0.0)
            || (reading.price < 0.0 && reading.flow < 0.0);
        let mut confidence = reading.price.abs() * 2.0;
        if agree {
            confidence *= 1.3;
        }
        if reading.volume >= volume_threshold {
            confidence *= 1.2;
        }
        confidence.min(1.0)
    }
}

#[async_trait]
impl Strategy for MomentumStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Momentum
    }

    async fn analyze(
        &self,
        market: &MarketInfo,
        book: &OrderBook,
        params: &StrategyParams,
    ) -> Result<Option<MarketOpportunity>> {
        let threshold = params.get_or("momentum_threshold", self.config.momentum_threshold);
        let volume_threshold = params.get_or("volume_threshold", self.config.volume_threshold);
        let min_confidence = params.get_or("min_confidence", self.config.min_confidence);
        let ticker = &market.ticker;

        let (prices, volumes) = self.observe(
            ticker,
            Self::current_price(market, book),
            market.volume.max(0) as f64,
        );
        if prices.len() < self.min_history() {
            return Ok(None);
        }

        let reading = MomentumReading {
            price: Self::price_momentum(&prices),
            volume: Self::volume_momentum(&volumes, self.config.lookback_periods),
            flow: Self::flow_signal(book),
        };
        let signal = Self::combine(reading, volume_threshold);
        if signal.abs() < threshold {
            return Ok(None);
        }

        let confidence = Self::confidence(reading, volume_threshold);
        if confidence < min_confidence {
            return Ok(None);
        }

        let side = if signal > 0.0 { Side::Yes } else { Side::No };
        let edge = signal.abs() * 100.0;
        let entry_price = signals::entry_price(market, book, side);

        info!(
            "Momentum: {} | {} | signal={:.3} edge={:.2}",
            ticker, side, signal, edge
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
                "Momentum: price={:.3}, volume={:.2}x, flow={:.3}",
                reading.price, reading.volume, reading.flow
            ),
            liquidity_score: signals::liquidity_score(market, book),
            probability: (0.5 + signal.abs() * 0.5).clamp(0.05, 0.95),
            correlation_group: signals::correlation_group(ticker),
            sources: vec![StrategyKind::Momentum],
            ..Default::default()
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BookSide, PriceLevel};

    fn market(yes_bid: i64, yes_ask: i64, volume: i64) -> MarketInfo {
        MarketInfo {
            ticker: "BTC-100K".into(),
            status: "open".into(),
            yes_bid,
            yes_ask,
            no_ask: 100 - yes_bid,
            volume,
            ..Default::default()
        }
    }

    fn bullish_book() -> OrderBook {
        OrderBook {
            ticker: "BTC-100K".into(),
            yes: BookSide {
                bids: vec![PriceLevel { price: 60, count: 300 }],
                asks: vec![PriceLevel { price: 62, count: 20 }],
            },
            no: BookSide::default(),
        }
    }

    fn strategy() -> MomentumStrategy {
        MomentumStrategy::new(MomentumConfig::default())
    }

    /// Feed `count` identical observations to build up history.
    async fn warm_up(s: &MomentumStrategy, yes_bid: i64, volume: i64, count: usize) {
        let params = StrategyParams::default();
        let empty = OrderBook::empty("BTC-100K");
        for _ in 0..count {
            let quiet = s
                .analyze(&market(yes_bid, yes_bid + 2, volume), &empty, &params)
                .await
                .unwrap();
            assert!(quiet.is_none());
        }
    }

    #[tokio::test]
    async fn test_silent_until_lookback_filled() {
        let s = strategy();
        let params = StrategyParams::default();
        let empty = OrderBook::empty("BTC-100K");
        assert!(s.analyze(&market(30, 32, 100), &empty, &params).await.unwrap().is_none());
        assert!(s.analyze(&market(40, 42, 100), &empty, &params).await.unwrap().is_none());
        // A sharp third move with heavy volume still has too little history.
        let third = s
            .analyze(&market(60, 62, 400), &bullish_book(), &params)
            .await
            .unwrap();
        assert!(third.is_none());
        assert_eq!(s.tracked_tickers(), 1);
    }

    #[tokio::test]
    async fn test_rising_prices_with_volume_go_long() {
        let s = strategy();
        let params = StrategyParams::default();
        let empty = OrderBook::empty("BTC-100K");
        warm_up(&s, 30, 100, 8).await;
        assert!(s.analyze(&market(40, 42, 100), &empty, &params).await.unwrap().is_none());
        let opp = s
            .analyze(&market(60, 62, 400), &bullish_book(), &params)
            .await
            .unwrap()
            .expect("signal");

        assert_eq!(opp.side(), Side::Yes);
        assert_eq!(opp.entry_price(), 62);
        assert!(opp.edge() > 2.0);
        assert!(opp.probability() > 0.5 && opp.probability() <= 0.95);
        assert_eq!(opp.correlation_group(), "crypto");
    }

    #[tokio::test]
    async fn test_falling_prices_go_short() {
        let s = strategy();
        let params = StrategyParams::default();
        let empty = OrderBook::empty("BTC-100K");
        warm_up(&s, 70, 100, 8).await;
        s.analyze(&market(60, 62, 100), &empty, &params).await.unwrap();
        let opp = s
            .analyze(&market(40, 42, 300), &empty, &params)
            .await
            .unwrap()
            .expect("signal");
        assert_eq!(opp.side(), Side::No);
        assert_eq!(opp.entry_price(), 60);
    }

    #[test]
    fn test_volume_neutral_below_lookback() {
        assert_eq!(MomentumStrategy::volume_momentum(&[100.0, 400.0], 10), 1.0);
        let mut volumes = vec![100.0; 9];
        volumes.push(400.0);
        assert_eq!(MomentumStrategy::volume_momentum(&volumes, 10), 4.0);
    }

    #[tokio::test]
    async fn test_flat_prices_no_signal() {
        let s = strategy();
        let params = StrategyParams::default();
        let empty = OrderBook::empty("BTC-100K");
        for _ in 0..5 {
            assert!(s.analyze(&market(50, 52, 100), &empty, &params).await.unwrap().is_none());
        }
    }

    #[test]
    fn test_history_is_capped() {
        let s = strategy();
        for i in 0..50 {
            s.observe("X", 0.5, i as f64);
        }
        let (prices, volumes) = s.observe("X", 0.5, 0.0);
        assert_eq!(prices.len(), 20);
        assert_eq!(volumes.len(), 20);
        s.clear_history(Some("X"));
        assert_eq!(s.tracked_tickers(), 0);
    }

    #[test]
    fn test_whale_on_bid_side() {
        let flow = MomentumStrategy::flow_signal(&bullish_book());
        // imbalance (300 - 20) / 320 × 0.8 + 0.2 × 0.2
        assert!((flow - (0.875 * 0.8 + 0.04)).abs() < 1e-9);
    }

    #[test]
    fn test_low_volume_damps_price_momentum() {
        let strong = MomentumReading { price: 0.2, volume: 1.5, flow: 0.0 };
        let weak = MomentumReading { price: 0.2, volume: 0.75, flow: 0.0 };
        assert!(MomentumStrategy::combine(weak, 1.5) < MomentumStrategy::combine(strong, 1.5));
    }
}
