//! Domain types shared across the bot.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Kalshi Market Types ───────────────────────────────────────────────

/// A Kalshi market as returned by GET /trade-api/v2/markets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketInfo {
    pub ticker: String,
    #[serde(default)]
    pub event_ticker: String,
    #[serde(default)]
    pub series_ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub yes_bid: i64,
    #[serde(default)]
    pub yes_ask: i64,
    #[serde(default)]
    pub no_bid: i64,
    #[serde(default)]
    pub no_ask: i64,
    #[serde(default)]
    pub last_price: i64,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub volume_24h: i64,
    #[serde(default)]
    pub open_interest: i64,
    /// Settlement outcome, `"yes"` or `"no"` once determined, empty before.
    #[serde(default)]
    pub result: String,
    /// Filled in by the scanner, not by the venue.
    #[serde(default)]
    pub mid_probability: f64,
    /// Filled in by the scanner, not by the venue.
    #[serde(default)]
    pub liquidity_score: f64,
}

impl MarketInfo {
    /// Statuses the venue uses for markets that still accept orders.
    pub const TRADEABLE_STATUSES: [&'static str; 3] = ["active", "open", "initialized"];

    pub fn is_tradeable(&self) -> bool {
        Self::TRADEABLE_STATUSES
            .iter()
            .any(|s| self.status.eq_ignore_ascii_case(s))
    }

    /// Mid of the YES quote as a probability, falling back to the last trade, then 0.5.
    pub fn mid_price(&self) -> f64 {
        if self.yes_bid > 0 && self.yes_ask > 0 {
            (self.yes_bid + self.yes_ask) as f64 / 200.0
        } else if self.last_price > 0 {
            self.last_price as f64 / 100.0
        } else {
            0.5
        }
    }

    /// YES spread in cents, if both sides are quoted.
    pub fn spread(&self) -> Option<i64> {
        (self.yes_bid > 0 && self.yes_ask > 0).then(|| self.yes_ask - self.yes_bid)
    }

    /// Volume-only liquidity proxy in [0.1, 1].
    pub fn volume_liquidity(&self) -> f64 {
        (self.volume.max(100) as f64 / 1000.0).min(1.0)
    }

    /// Cents one contract on `side` pays out, once the market has settled.
    pub fn settlement_price(&self, side: Side) -> Option<i64> {
        let winner = match self.result.trim().to_ascii_lowercase().as_str() {
            "yes" => Side::Yes,
            "no" => Side::No,
            _ => return None,
        };
        Some(if winner == side { 100 } else { 0 })
    }

    /// Ask for the given side in cents (0 when unquoted).
    pub fn ask_for(&self, side: Side) -> i64 {
        match side {
            Side::Yes => self.yes_ask,
            Side::No => self.no_ask,
        }
    }
}

/// Paginated response from GET /trade-api/v2/markets.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketsResponse {
    pub markets: Vec<MarketInfo>,
    #[serde(default)]
    pub cursor: Option<String>,
}

// ── Order Book ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price in cents (1-99).
    pub price: i64,
    /// Resting contracts at this price.
    pub count: i64,
}

/// One contract side of the book. Bids are sorted best (highest) first,
/// asks best (lowest) first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSide {
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl BookSide {
    pub fn best_bid(&self) -> Option<i64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<i64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn bid_volume(&self, depth: usize) -> i64 {
        self.bids.iter().take(depth).map(|l| l.count).sum()
    }

    pub fn ask_volume(&self, depth: usize) -> i64 {
        self.asks.iter().take(depth).map(|l| l.count).sum()
    }
}

/// Order book snapshot for a single market.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub yes: BookSide,
    #[serde(default)]
    pub no: BookSide,
}

impl OrderBook {
    pub fn empty(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            ..Default::default()
        }
    }

    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }

    /// YES mid as a probability, when both YES bid and ask are present.
    pub fn mid_probability(&self) -> Option<f64> {
        match (self.yes.best_bid(), self.yes.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) as f64 / 200.0),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.yes.bids.is_empty()
            && self.yes.asks.is_empty()
            && self.no.bids.is_empty()
            && self.no.asks.is_empty()
    }
}

// ── Orders ────────────────────────────────────────────────────────────

/// An order to be placed.
#[derive(Debug, Clone, Serialize)]
pub struct OrderIntent {
    /// Market ticker.
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    pub order_type: OrderType,
    /// Limit price in cents (1-99).
    pub price_cents: i64,
    /// Number of contracts.
    pub count: i64,
    /// Reason for the trade (for logging).
    pub reason: String,
}

/// Order request body for Kalshi API.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    pub client_order_id: String,
    pub count: i64,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_price: Option<i64>,
}

/// Response from POST /trade-api/v2/portfolio/orders.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderResponse {
    pub order: OrderInfo,
}

/// An order as returned by the Kalshi API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: String,
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: String,
    #[serde(default)]
    pub yes_price: i64,
    #[serde(default)]
    pub no_price: i64,
    #[serde(default)]
    pub fill_count: i64,
    #[serde(default)]
    pub remaining_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// Lenient parse: anything other than "no" (any case, trimmed) is YES.
    pub fn parse_lenient(raw: &str) -> Side {
        if raw.trim().eq_ignore_ascii_case("no") {
            Side::No
        } else {
            Side::Yes
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
}

// ── Position Types ────────────────────────────────────────────────────

/// A position in a market as reported by the venue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub ticker: String,
    /// Net contracts held (positive = YES, negative = NO).
    #[serde(default)]
    pub position: i64,
    /// Total cost basis in cents.
    #[serde(default)]
    pub market_exposure: i64,
    /// Realized PnL in cents.
    #[serde(default)]
    pub realized_pnl: i64,
}

/// Portfolio positions response.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionsResponse {
    #[serde(default)]
    pub market_positions: Vec<PositionSnapshot>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Balance response.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    /// Balance in cents.
    pub balance: i64,
}

// ── News ──────────────────────────────────────────────────────────────

/// A single headline from an external news feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headline {
    pub title: String,
    #[serde(default)]
    pub summary: String,
}

impl Headline {
    /// Lowercased title and summary, the text keyword matching runs over.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.summary).to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parse_lenient() {
        assert_eq!(Side::parse_lenient("no"), Side::No);
        assert_eq!(Side::parse_lenient(" NO "), Side::No);
        assert_eq!(Side::parse_lenient("yes"), Side::Yes);
        assert_eq!(Side::parse_lenient("maybe"), Side::Yes);
        assert_eq!(Side::parse_lenient(""), Side::Yes);
    }

    #[test]
    fn test_market_mid_price_fallbacks() {
        let mut m = MarketInfo {
            ticker: "T".into(),
            yes_bid: 40,
            yes_ask: 42,
            last_price: 55,
            ..Default::default()
        };
        assert!((m.mid_price() - 0.41).abs() < 1e-9);
        m.yes_bid = 0;
        assert!((m.mid_price() - 0.55).abs() < 1e-9);
        m.last_price = 0;
        assert!((m.mid_price() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_volume_liquidity_floor_and_cap() {
        let mut m = MarketInfo::default();
        assert!((m.volume_liquidity() - 0.1).abs() < 1e-9);
        m.volume = 500;
        assert!((m.volume_liquidity() - 0.5).abs() < 1e-9);
        m.volume = 50_000;
        assert!((m.volume_liquidity() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_settlement_price_by_result() {
        let mut m = MarketInfo::default();
        assert_eq!(m.settlement_price(Side::Yes), None);
        m.result = "no".into();
        assert_eq!(m.settlement_price(Side::No), Some(100));
        assert_eq!(m.settlement_price(Side::Yes), Some(0));
        m.result = "YES".into();
        assert_eq!(m.settlement_price(Side::Yes), Some(100));
    }

    #[test]
    fn test_tradeable_status() {
        let mut m = MarketInfo::default();
        m.status = "Active".into();
        assert!(m.is_tradeable());
        m.status = "settled".into();
        assert!(!m.is_tradeable());
    }

    #[test]
    fn test_orderbook_mid_and_volume() {
        let book = OrderBook {
            ticker: "T".into(),
            yes: BookSide {
                bids: vec![PriceLevel { price: 40, count: 10 }, PriceLevel { price: 39, count: 5 }],
                asks: vec![PriceLevel { price: 42, count: 7 }],
            },
            no: BookSide::default(),
        };
        assert_eq!(book.mid_probability(), Some(0.41));
        assert_eq!(book.yes.bid_volume(3), 15);
        assert_eq!(book.yes.ask_volume(3), 7);
        assert!(!book.is_empty());
        assert!(OrderBook::empty("X").is_empty());
    }
}
