//! Keyword scoring of recent headlines that mention a market.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::{NewsConfig, SentimentConfig};
use common::{
    Headline, MarketInfo, MarketOpportunity, NewOpportunity, NewsSource, OrderBook, Result, Side,
    StrategyKind,
};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::analyzer::{Strategy, StrategyParams};
use crate::signals;

const BULLISH: [&str; 10] = [
    "up", "rise", "gain", "high", "positive", "beat", "surge", "win", "approved", "growth",
];
const BEARISH: [&str; 9] = [
    "down", "fall", "loss", "low", "negative", "miss", "crash", "denied", "recession",
];

const MIN_TICKER_PART_LEN: usize = 3;
const MIN_TITLE_WORD_LEN: usize = 5;
const EDGE_PER_POINT: f64 = 5.0;

#[derive(Debug, Default)]
struct NewsCache {
    headlines: Vec<Headline>,
    updated_at: Option<Instant>,
}

/// Clears the refresh flag on every exit path, including cancellation.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SentimentStrategy {
    config: SentimentConfig,
    news: NewsConfig,
    source: Option<Arc<dyn NewsSource>>,
    cache: RwLock<NewsCache>,
    refreshing: AtomicBool,
}

impl SentimentStrategy {
    pub fn new(config: SentimentConfig, news: NewsConfig, source: Option<Arc<dyn NewsSource>>) -> Self {
        Self {
            config,
            news,
            source,
            cache: RwLock::new(NewsCache::default()),
            refreshing: AtomicBool::new(false),
        }
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.news.refresh_secs)
    }

    /// Refetch every feed when the cache is stale. Concurrent callers skip
    /// the refresh and score against the current headlines.
    async fn refresh_if_stale(&self, source: &dyn NewsSource) {
        let fresh = self
            .cache
            .read()
            .await
            .updated_at
            .is_some_and(|t| t.elapsed() < self.refresh_interval());
        if fresh {
            return;
        }
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let _guard = RefreshGuard(&self.refreshing);

        info!("Refreshing news sentiment from {} feeds", self.news.feeds.len());
        let mut headlines = Vec::new();
        for feed in &self.news.feeds {
            match source.fetch_headlines(feed, self.news.per_feed_limit).await {
                Ok(items) => headlines.extend(items),
                Err(e) => warn!("News fetch failed for {}: {}", feed, e),
            }
        }

        if !headlines.is_empty() {
            let mut cache = self.cache.write().await;
            cache.headlines = headlines;
            cache.updated_at = Some(Instant::now());
        }
    }

    pub async fn cached_headlines(&self) -> usize {
        self.cache.read().await.headlines.len()
    }

    /// Average keyword score across headlines relevant to the market, with
    /// the first relevant title. `None` when nothing mentions it.
    pub fn score(market: &MarketInfo, headlines: &[Headline]) -> Option<(f64, String)> {
        let ticker = market.ticker.to_lowercase();
        let title = market.title.to_lowercase();
        let ticker_parts: Vec<&str> = ticker
            .split('-')
            .filter(|p| p.len() >= MIN_TICKER_PART_LEN)
            .collect();
        let title_words: Vec<&str> = title
            .split_whitespace()
            .filter(|w| w.len() >= MIN_TITLE_WORD_LEN)
            .collect();

        let mut total = 0i64;
        let mut hits = 0usize;
        let mut first_title = None;

        for headline in headlines {
            let text = headline.search_text();
            let relevant = ticker_parts.iter().any(|p| text.contains(p))
                || title_words.iter().any(|w| text.contains(w));
            if !relevant {
                continue;
            }
            let bullish = BULLISH.iter().filter(|w| text.contains(*w)).count() as i64;
            let bearish = BEARISH.iter().filter(|w| text.contains(*w)).count() as i64;
            total += bullish - bearish;
            hits += 1;
            first_title.get_or_insert_with(|| headline.title.clone());
        }

        let first_title = first_title?;
        Some((total as f64 / hits as f64, first_title))
    }
}

#[async_trait]
impl Strategy for SentimentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sentiment
    }

    async fn analyze(
        &self,
        market: &MarketInfo,
        book: &OrderBook,
        params: &StrategyParams,
    ) -> Result<Option<MarketOpportunity>> {
        let Some(source) = self.source.as_deref() else {
            return Ok(None);
        };
        if self.news.feeds.is_empty() {
            return Ok(None);
        }
        self.refresh_if_stale(source).await;

        let threshold = params.get_or("sentiment_threshold", self.config.sentiment_threshold);
        let scored = {
            let cache = self.cache.read().await;
            Self::score(market, &cache.headlines)
        };
        let Some((avg, first_title)) = scored else {
            return Ok(None);
        };
        if avg.abs() < threshold {
            return Ok(None);
        }

        let side = if avg > 0.0 { Side::Yes } else { Side::No };
        let edge = (avg.abs() * EDGE_PER_POINT).min(self.config.max_edge);
        let entry_price = signals::entry_price(market, book, side);
        let excerpt: String = first_title.chars().take(50).collect();

        info!(
            "Sentiment: {} | {} | score={:.2} edge={:.2}",
            market.ticker, side, avg, edge
        );

        Ok(Some(MarketOpportunity::new(NewOpportunity {
            ticker: market.ticker.clone(),
            title: market.title.clone(),
            edge,
            confidence: self.config.confidence,
            side,
            entry_price,
            suggested_size: 1,
            reasoning: format!("News sentiment: {}... (score {:.2})", excerpt, avg),
            liquidity_score: self.config.liquidity,
            probability: self.config.probability,
            correlation_group: signals::correlation_group(&market.ticker),
            sources: vec![StrategyKind::Sentiment],
            ..Default::default()
        })))
    }
}
