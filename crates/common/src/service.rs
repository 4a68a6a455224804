//! Collaborator interfaces the trading core depends on but does not implement.

use async_trait::async_trait;

use crate::types::{Headline, MarketInfo, OrderBook, OrderInfo, OrderIntent, PositionSnapshot};
use crate::Result;

/// Filter for market listing.
#[derive(Debug, Clone, Default)]
pub struct MarketFilter {
    pub series_ticker: Option<String>,
    pub status: Option<String>,
    pub limit: u32,
}

impl MarketFilter {
    pub fn open_in_series(series: &str, limit: u32) -> Self {
        Self {
            series_ticker: Some(series.to_string()),
            status: Some("open".to_string()),
            limit,
        }
    }

    pub fn open(limit: u32) -> Self {
        Self {
            series_ticker: None,
            status: Some("open".to_string()),
            limit,
        }
    }
}

/// Market data and order routing for a prediction-market venue.
///
/// Every call is fallible and may be rate limited by the remote side,
/// surfacing as [`crate::Error::RateLimited`].
#[async_trait]
pub trait MarketService: Send + Sync {
    async fn list_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketInfo>>;

    async fn get_market(&self, ticker: &str) -> Result<MarketInfo>;

    async fn get_orderbook(&self, ticker: &str) -> Result<OrderBook>;

    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderInfo>;

    /// Available balance in cents.
    async fn get_balance(&self) -> Result<i64>;

    async fn get_positions(&self) -> Result<Vec<PositionSnapshot>>;
}

/// Source of news headlines for sentiment scoring.
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch_headlines(&self, feed_url: &str, limit: usize) -> Result<Vec<Headline>>;
}
