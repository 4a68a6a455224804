//! Order-book and market measures shared by the strategies.

use common::{MarketInfo, OrderBook, Side};

/// Levels counted for volume imbalance in fair-value estimation.
pub const IMBALANCE_DEPTH: usize = 3;
/// Levels counted for depth and order-flow measures.
pub const FLOW_DEPTH: usize = 5;

const VOLUME_FOR_FULL_LIQUIDITY: f64 = 5000.0;
const DEPTH_FOR_FULL_LIQUIDITY: f64 = 100.0;

/// YES bid share of the top `depth` levels minus one half, in [-0.5, 0.5].
/// `None` unless both YES bids and asks are present with nonzero size.
pub fn bid_share_imbalance(book: &OrderBook, depth: usize) -> Option<f64> {
    if book.yes.bids.is_empty() || book.yes.asks.is_empty() {
        return None;
    }
    let bid = book.yes.bid_volume(depth) as f64;
    let ask = book.yes.ask_volume(depth) as f64;
    let total = bid + ask;
    (total > 0.0).then(|| bid / total - 0.5)
}

/// `(bid - ask) / (bid + ask)` over the top `depth` YES levels, in [-1, 1].
pub fn flow_imbalance(book: &OrderBook, depth: usize) -> f64 {
    let bid = book.yes.bid_volume(depth) as f64;
    let ask = book.yes.ask_volume(depth) as f64;
    let total = bid + ask;
    if total > 0.0 {
        (bid - ask) / total
    } else {
        0.0
    }
}

/// Resting YES contracts in the top `depth` bid and ask levels.
pub fn top_depth(book: &OrderBook, depth: usize) -> i64 {
    book.yes.bid_volume(depth) + book.yes.ask_volume(depth)
}

/// `0.6 × volume score + 0.4 × depth score`, each saturating at 1.
pub fn liquidity_score(market: &MarketInfo, book: &OrderBook) -> f64 {
    let volume_score = (market.volume.max(0) as f64 / VOLUME_FOR_FULL_LIQUIDITY).min(1.0);
    let depth_score = (top_depth(book, FLOW_DEPTH) as f64 / DEPTH_FOR_FULL_LIQUIDITY).min(1.0);
    0.6 * volume_score + 0.4 * depth_score
}

/// Bucket used for concentration limits.
pub fn correlation_group(ticker: &str) -> String {
    let upper = ticker.to_uppercase();
    let starts_with_any = |prefixes: &[&str]| prefixes.iter().any(|p| upper.starts_with(p));

    if starts_with_any(&["BTC", "ETH", "KXCRYPTO"]) {
        "crypto".to_string()
    } else if starts_with_any(&["FED", "KXECON"]) {
        "macro".to_string()
    } else if starts_with_any(&["INX", "KXINX"]) {
        "equity".to_string()
    } else if let Some((prefix, _)) = upper.split_once('-') {
        prefix.to_lowercase()
    } else {
        "general".to_string()
    }
}

/// Best ask for `side` from the book, then the market quote, then 50¢.
pub fn entry_price(market: &MarketInfo, book: &OrderBook, side: Side) -> i64 {
    book.side(side)
        .best_ask()
        .filter(|p| *p > 0)
        .or_else(|| Some(market.ask_for(side)).filter(|p| *p > 0))
        .unwrap_or(50)
}

/// Market ask for `side`, treating an unquoted side as 100¢.
pub fn quoted_ask(market: &MarketInfo, side: Side) -> i64 {
    match market.ask_for(side) {
        p if p > 0 => p,
        _ => 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BookSide, PriceLevel};

    fn level(price: i64, count: i64) -> PriceLevel {
        PriceLevel { price, count }
    }

    fn book(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> OrderBook {
        OrderBook {
            ticker: "T".into(),
            yes: BookSide { bids, asks },
            no: BookSide::default(),
        }
    }

    #[test]
    fn test_bid_share_imbalance() {
        let b = book(vec![level(40, 30)], vec![level(42, 10)]);
        assert!((bid_share_imbalance(&b, IMBALANCE_DEPTH).unwrap() - 0.25).abs() < 1e-9);
        assert_eq!(bid_share_imbalance(&OrderBook::empty("T"), 3), None);
        assert_eq!(bid_share_imbalance(&book(vec![level(40, 5)], vec![]), 3), None);
    }

    #[test]
    fn test_flow_imbalance_bounds() {
        let b = book(vec![level(40, 10)], vec![level(42, 30)]);
        assert!((flow_imbalance(&b, FLOW_DEPTH) + 0.5).abs() < 1e-9);
        assert_eq!(flow_imbalance(&OrderBook::empty("T"), FLOW_DEPTH), 0.0);
    }

    #[test]
    fn test_liquidity_score_blend() {
        let market = MarketInfo {
            volume: 10_000,
            ..Default::default()
        };
        assert!((liquidity_score(&market, &OrderBook::empty("T")) - 0.6).abs() < 1e-9);

        let b = book(vec![level(40, 30)], vec![level(42, 20)]);
        let market = MarketInfo {
            volume: 2500,
            ..Default::default()
        };
        assert!((liquidity_score(&market, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_groups() {
        assert_eq!(correlation_group("BTCD-24DEC31"), "crypto");
        assert_eq!(correlation_group("KXCRYPTO-X"), "crypto");
        assert_eq!(correlation_group("FED-25MAR"), "macro");
        assert_eq!(correlation_group("KXINXY-25"), "equity");
        assert_eq!(correlation_group("NBA-FINALS"), "nba");
        assert_eq!(correlation_group("WEATHER"), "general");
    }

    #[test]
    fn test_entry_price_fallbacks() {
        let market = MarketInfo {
            yes_ask: 42,
            no_ask: 0,
            ..Default::default()
        };
        let b = book(vec![], vec![level(44, 1)]);
        assert_eq!(entry_price(&market, &b, Side::Yes), 44);
        assert_eq!(entry_price(&market, &OrderBook::empty("T"), Side::Yes), 42);
        assert_eq!(entry_price(&market, &OrderBook::empty("T"), Side::No), 50);
        assert_eq!(quoted_ask(&market, Side::No), 100);
    }
}
