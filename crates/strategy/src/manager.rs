//! Runs the enabled strategies concurrently for one market and folds their
//! signals into a single weighted opportunity.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use common::config::{NewsConfig, StrategyConfig};
use common::{
    MarketInfo, MarketOpportunity, NewOpportunity, NewsSource, OrderBook, Side, StrategyKind,
};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::analyzer::{Strategy, WeightSource};
use crate::fundamental::FundamentalStrategy;
use crate::momentum::MomentumStrategy;
use crate::sentiment::SentimentStrategy;

const ADAPTIVE_MIN: f64 = 0.1;
const ADAPTIVE_MAX: f64 = 2.0;
const BEST_BOOST: f64 = 1.05;
const BEST_CAP: f64 = 1.5;
const OTHER_DECAY: f64 = 0.98;
const OTHER_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyPerformance {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyStats {
    pub weights: BTreeMap<StrategyKind, f64>,
    pub performance: BTreeMap<StrategyKind, StrategyPerformance>,
}

pub struct StrategyManager {
    strategies: Vec<Arc<dyn Strategy>>,
    semaphore: Arc<Semaphore>,
    edge_boost: f64,
    confidence_boost: f64,
    weights: Mutex<BTreeMap<StrategyKind, f64>>,
    performance: Mutex<BTreeMap<StrategyKind, StrategyPerformance>>,
}

impl StrategyManager {
    /// Manager over an explicit strategy set. Each strategy's static weight
    /// comes from `config.weights`.
    pub fn new(config: &StrategyConfig, strategies: Vec<Arc<dyn Strategy>>) -> Self {
        let weights = strategies
            .iter()
            .map(|s| (s.kind(), static_weight(config, s.kind())))
            .collect();
        info!("StrategyManager initialized with {} strategies", strategies.len());
        Self {
            strategies,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_strategies.max(1))),
            edge_boost: config.consensus_edge_boost,
            confidence_boost: config.consensus_confidence_boost,
            weights: Mutex::new(weights),
            performance: Mutex::new(BTreeMap::new()),
        }
    }

    /// Manager over the strategies enabled in `config`.
    pub fn from_config(
        config: &StrategyConfig,
        news: &NewsConfig,
        news_source: Option<Arc<dyn NewsSource>>,
    ) -> Self {
        let mut strategies: Vec<Arc<dyn Strategy>> = Vec::new();
        if config.enable_fundamental {
            strategies.push(Arc::new(FundamentalStrategy::new(config.fundamental.clone())));
        }
        if config.enable_sentiment {
            strategies.push(Arc::new(SentimentStrategy::new(
                config.sentiment.clone(),
                news.clone(),
                news_source,
            )));
        }
        if config.enable_momentum {
            strategies.push(Arc::new(MomentumStrategy::new(config.momentum.clone())));
        }
        Self::new(config, strategies)
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    fn current_weight(&self, kind: StrategyKind) -> f64 {
        self.weights
            .lock()
            .ok()
            .and_then(|w| w.get(&kind).copied())
            .unwrap_or(1.0)
    }

    /// Every enabled strategy's weighted opportunity for one market. Failing
    /// strategies are logged and skipped.
    pub async fn analyze_market(
        &self,
        market: &MarketInfo,
        book: &OrderBook,
        learner: &dyn WeightSource,
    ) -> Vec<MarketOpportunity> {
        let runs = self.strategies.iter().map(|strategy| async move {
            let Ok(_permit) = self.semaphore.acquire().await else {
                return None;
            };
            let kind = strategy.kind();
            let params = learner.params(kind);

            match strategy.analyze(market, book, &params).await {
                Ok(Some(mut opp)) => {
                    let adaptive = learner.weight(kind).clamp(ADAPTIVE_MIN, ADAPTIVE_MAX);
                    opp.apply_weight(self.current_weight(kind) * adaptive);
                    opp.prefix_reasoning(&format!("[{}] ", kind));
                    Some(opp)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("Strategy {} failed on {}: {}", kind, market.ticker, e);
                    None
                }
            }
        });

        join_all(runs).await.into_iter().flatten().collect()
    }

    /// One opportunity from many: the consensus when all signals share a side
    /// and at least two agree, otherwise the highest score.
    pub fn aggregate_signals(&self, opportunities: Vec<MarketOpportunity>) -> Option<MarketOpportunity> {
        if opportunities.len() <= 1 {
            return opportunities.into_iter().next();
        }

        let yes = opportunities.iter().filter(|o| o.side() == Side::Yes).count();
        let no = opportunities.len() - yes;
        let consensus_side = match (yes, no) {
            (y, 0) if y >= 2 => Some(Side::Yes),
            (0, n) if n >= 2 => Some(Side::No),
            _ => None,
        };

        match consensus_side {
            Some(side) => Some(self.consensus(&opportunities, side)),
            None => opportunities
                .into_iter()
                .max_by(|a, b| a.score().total_cmp(&b.score())),
        }
    }

    fn consensus(&self, signals: &[MarketOpportunity], side: Side) -> MarketOpportunity {
        let n = signals.len() as f64;
        let total_confidence: f64 = signals.iter().map(|s| s.confidence()).sum();

        let edge = confidence_weighted(signals, |s| s.edge());
        let price = confidence_weighted(signals, |s| s.entry_price() as f64);
        let probability = confidence_weighted(signals, |s| s.probability());
        let liquidity = confidence_weighted(signals, |s| s.liquidity_score());
        let confidence = (total_confidence / n * self.confidence_boost).min(1.0);
        let size = signals.iter().map(|s| s.suggested_size()).max().unwrap_or(0);

        let sources: BTreeSet<StrategyKind> = signals
            .iter()
            .flat_map(|s| s.sources().iter().copied())
            .collect();
        let names: Vec<&str> = sources.iter().map(|k| k.name()).collect();
        let base = &signals[0];

        debug!(
            "Consensus on {} {} from {}",
            base.ticker(),
            side,
            names.join(", ")
        );

        MarketOpportunity::new(NewOpportunity {
            ticker: base.ticker().to_string(),
            title: base.title().to_string(),
            edge: edge * self.edge_boost,
            confidence,
            side,
            entry_price: price.round() as i64,
            suggested_size: size as i64,
            reasoning: format!(
                "CONSENSUS ({}): {} strategies agree on {}",
                names.join(", "),
                signals.len(),
                side.as_str().to_uppercase()
            ),
            liquidity_score: liquidity,
            probability,
            correlation_group: base.correlation_group().to_string(),
            sources: sources.into_iter().collect(),
            ..Default::default()
        })
    }

    // ── Performance feedback ──────────────────────────────────────────

    pub fn record_strategy_result(&self, kind: StrategyKind, pnl: f64) {
        let Ok(mut performance) = self.performance.lock() else {
            return;
        };
        let perf = performance.entry(kind).or_default();
        perf.trades += 1;
        perf.total_pnl += pnl;
        if pnl > 0.0 {
            perf.wins += 1;
        } else {
            perf.losses += 1;
        }
        perf.avg_pnl = perf.total_pnl / perf.trades as f64;
        drop(performance);

        self.adjust_weights();
    }

    /// Nudge the best average-pnl strategy up and the rest down. No-op until
    /// at least two strategies have results.
    pub fn adjust_weights(&self) {
        let best = {
            let Ok(performance) = self.performance.lock() else {
                return;
            };
            if performance.len() < 2 {
                return;
            }
            performance
                .iter()
                .max_by(|a, b| a.1.avg_pnl.total_cmp(&b.1.avg_pnl))
                .map(|(kind, _)| *kind)
        };
        let Ok(mut weights) = self.weights.lock() else {
            return;
        };
        for (kind, weight) in weights.iter_mut() {
            *weight = if Some(*kind) == best {
                (*weight * BEST_BOOST).min(BEST_CAP)
            } else {
                (*weight * OTHER_DECAY).max(OTHER_FLOOR)
            };
        }
    }

    /// Set a static weight, clamped to the adaptive bounds.
    pub fn update_strategy_weight(&self, kind: StrategyKind, weight: f64) {
        if let Ok(mut weights) = self.weights.lock() {
            if let Some(w) = weights.get_mut(&kind) {
                *w = weight.clamp(ADAPTIVE_MIN, ADAPTIVE_MAX);
                info!("Updated {} weight to {:.3}", kind, *w);
            }
        }
    }

    pub fn get_strategy_stats(&self) -> StrategyStats {
        StrategyStats {
            weights: self.weights.lock().map(|w| w.clone()).unwrap_or_default(),
            performance: self.performance.lock().map(|p| p.clone()).unwrap_or_default(),
        }
    }
}

/// Confidence-weighted mean of `field`, or the plain mean when every
/// confidence is zero.
fn confidence_weighted(signals: &[MarketOpportunity], field: impl Fn(&MarketOpportunity) -> f64) -> f64 {
    let total: f64 = signals.iter().map(|s| s.confidence()).sum();
    if total > 0.0 {
        signals.iter().map(|s| field(s) * s.confidence()).sum::<f64>() / total
    } else {
        signals.iter().map(&field).sum::<f64>() / signals.len().max(1) as f64
    }
}

fn static_weight(config: &StrategyConfig, kind: StrategyKind) -> f64 {
    match kind {
        StrategyKind::Fundamental => config.weights.fundamental,
        StrategyKind::Sentiment => config.weights.sentiment,
        StrategyKind::Momentum => config.weights.momentum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{NeutralWeights, StrategyParams};
    use async_trait::async_trait;
    use common::{Error, Headline, Result};

    struct Fixed {
        kind: StrategyKind,
        result: Option<(Side, f64)>,
        fail: bool,
    }

    #[async_trait]
    impl Strategy for Fixed {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn analyze(
            &self,
            market: &MarketInfo,
            _book: &OrderBook,
            _params: &StrategyParams,
        ) -> Result<Option<MarketOpportunity>> {
            if self.fail {
                return Err(Error::Other("boom".into()));
            }
            Ok(self.result.map(|(side, edge)| opp(&market.ticker, side, edge, 0.5, self.kind)))
        }
    }

    fn opp(ticker: &str, side: Side, edge: f64, confidence: f64, kind: StrategyKind) -> MarketOpportunity {
        MarketOpportunity::new(NewOpportunity {
            ticker: ticker.into(),
            edge,
            confidence,
            side,
            entry_price: 50,
            suggested_size: 1,
            liquidity_score: 0.5,
            probability: 0.6,
            sources: vec![kind],
            ..Default::default()
        })
    }

    fn market() -> MarketInfo {
        MarketInfo {
            ticker: "KXECON-1".into(),
            status: "open".into(),
            ..Default::default()
        }
    }

    fn manager_with(strategies: Vec<Arc<dyn Strategy>>) -> StrategyManager {
        StrategyManager::new(&StrategyConfig::default(), strategies)
    }

    #[test]
    fn test_consensus_of_three_yes() {
        let manager = manager_with(vec![]);
        let signals = vec![
            opp("A", Side::Yes, 5.0, 1.0, StrategyKind::Fundamental),
            opp("A", Side::Yes, 7.0, 1.0, StrategyKind::Momentum),
            opp("A", Side::Yes, 9.0, 1.0, StrategyKind::Sentiment),
        ];
        let consensus = manager.aggregate_signals(signals).unwrap();
        assert_eq!(consensus.side(), Side::Yes);
        assert!((consensus.edge() - 7.7).abs() < 1e-9);
        assert_eq!(consensus.confidence(), 1.0);
        assert_eq!(consensus.sources().len(), 3);
        assert!(consensus.reasoning().starts_with("CONSENSUS (Fundamental, Momentum, Sentiment)"));
    }

    #[test]
    fn test_consensus_confidence_weighted() {
        let manager = manager_with(vec![]);
        let signals = vec![
            opp("A", Side::No, 4.0, 0.75, StrategyKind::Fundamental),
            opp("A", Side::No, 8.0, 0.25, StrategyKind::Momentum),
        ];
        let consensus = manager.aggregate_signals(signals).unwrap();
        assert_eq!(consensus.side(), Side::No);
        // (4 × 0.75 + 8 × 0.25) / 1.0 × 1.1
        assert!((consensus.edge() - 5.5).abs() < 1e-9);
        assert!((consensus.confidence() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_split_sides_pick_highest_score() {
        let manager = manager_with(vec![]);
        let signals = vec![
            opp("A", Side::Yes, 5.0, 0.5, StrategyKind::Fundamental),
            opp("A", Side::No, 9.0, 0.5, StrategyKind::Momentum),
            opp("A", Side::Yes, 6.0, 0.5, StrategyKind::Sentiment),
        ];
        let best = manager.aggregate_signals(signals).unwrap();
        assert_eq!(best.side(), Side::No);
        assert_eq!(best.edge(), 9.0);
    }

    #[test]
    fn test_aggregate_empty_and_single() {
        let manager = manager_with(vec![]);
        assert!(manager.aggregate_signals(vec![]).is_none());
        let single = opp("A", Side::No, 3.0, 0.4, StrategyKind::Momentum);
        assert_eq!(manager.aggregate_signals(vec![single.clone()]), Some(single));
    }

    #[tokio::test]
    async fn test_analyze_applies_weights_and_skips_failures() {
        let manager = manager_with(vec![
            Arc::new(Fixed {
                kind: StrategyKind::Fundamental,
                result: Some((Side::Yes, 4.0)),
                fail: false,
            }),
            Arc::new(Fixed {
                kind: StrategyKind::Sentiment,
                result: Some((Side::Yes, 10.0)),
                fail: false,
            }),
            Arc::new(Fixed {
                kind: StrategyKind::Momentum,
                result: None,
                fail: true,
            }),
        ]);

        let mut opps = manager
            .analyze_market(&market(), &OrderBook::empty("KXECON-1"), &NeutralWeights)
            .await;
        opps.sort_by(|a, b| a.edge().total_cmp(&b.edge()));

        assert_eq!(opps.len(), 2);
        assert!((opps[0].edge() - 4.0).abs() < 1e-9);
        assert!(opps[0].reasoning().starts_with("[Fundamental] "));
        // Sentiment static weight 0.8.
        assert!((opps[1].edge() - 8.0).abs() < 1e-9);
        assert!((opps[1].confidence() - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_learner_weight_applied() {
        struct Doubling;
        impl WeightSource for Doubling {
            fn weight(&self, _kind: StrategyKind) -> f64 {
                5.0
            }
            fn params(&self, _kind: StrategyKind) -> StrategyParams {
                StrategyParams::default()
            }
            fn record_outcome(&self, _: &str, _: StrategyKind, _: f64, _: &str) -> Result<()> {
                Ok(())
            }
        }

        let manager = manager_with(vec![Arc::new(Fixed {
            kind: StrategyKind::Fundamental,
            result: Some((Side::Yes, 3.0)),
            fail: false,
        })]);
        let opps = manager
            .analyze_market(&market(), &OrderBook::empty("KXECON-1"), &Doubling)
            .await;
        // Adaptive weight clamped to 2.0.
        assert!((opps[0].edge() - 6.0).abs() < 1e-9);
        assert_eq!(opps[0].confidence(), 1.0);
    }

    struct StaticHeadlines(Vec<Headline>);

    #[async_trait]
    impl NewsSource for StaticHeadlines {
        async fn fetch_headlines(&self, _feed_url: &str, limit: usize) -> Result<Vec<Headline>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_default_feeds_drive_sentiment() {
        let config = StrategyConfig {
            enable_fundamental: false,
            enable_momentum: false,
            ..StrategyConfig::default()
        };
        let news = NewsConfig::default();
        assert!(!news.feeds.is_empty());
        let source: Arc<dyn NewsSource> = Arc::new(StaticHeadlines(vec![Headline {
            title: "Fed approved rate cut as growth beats forecasts".into(),
            summary: String::new(),
        }]));
        let manager = StrategyManager::from_config(&config, &news, Some(source));
        assert_eq!(manager.strategy_count(), 1);

        let fed = MarketInfo {
            ticker: "FED-25DEC-T4.50".into(),
            title: "Will the Federal Reserve cut rates?".into(),
            status: "open".into(),
            yes_bid: 40,
            yes_ask: 42,
            no_ask: 60,
            volume: 1000,
            ..Default::default()
        };
        let opps = manager
            .analyze_market(&fed, &OrderBook::empty(&fed.ticker), &NeutralWeights)
            .await;

        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].sources(), &[StrategyKind::Sentiment]);
        assert_eq!(opps[0].side(), Side::Yes);
        assert!(opps[0].reasoning().starts_with("[Sentiment] "));
    }

    #[test]
    fn test_adjust_weights_rewards_best() {
        let manager = StrategyManager::from_config(
            &StrategyConfig::default(),
            &NewsConfig::default(),
            None,
        );
        assert_eq!(manager.strategy_count(), 3);

        manager.record_strategy_result(StrategyKind::Fundamental, 5.0);
        let after_one = manager.get_strategy_stats();
        assert_eq!(after_one.weights[&StrategyKind::Fundamental], 1.0);

        manager.record_strategy_result(StrategyKind::Momentum, -2.0);
        let stats = manager.get_strategy_stats();
        assert!((stats.weights[&StrategyKind::Fundamental] - 1.05).abs() < 1e-9);
        assert!((stats.weights[&StrategyKind::Momentum] - 0.9 * 0.98).abs() < 1e-9);
        assert!((stats.weights[&StrategyKind::Sentiment] - 0.8 * 0.98).abs() < 1e-9);
        assert_eq!(stats.performance[&StrategyKind::Momentum].losses, 1);
    }
}
