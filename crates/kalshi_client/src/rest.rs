//! REST client for the Kalshi API.
//!
//! Covers market discovery, order books, order placement, and portfolio
//! queries. Every request is signed with RSA-PSS. Pacing is left to the
//! caller so one limiter can govern all outbound traffic.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use common::{
    BalanceResponse, BookSide, CreateOrderRequest, CreateOrderResponse, Error, MarketFilter,
    MarketInfo, MarketService, MarketsResponse, OrderBook, OrderInfo, OrderIntent,
    PositionSnapshot, PositionsResponse, PriceLevel, Side,
};

use crate::auth::KalshiAuth;

const DEMO_BASE_URL: &str = "https://demo-api.kalshi.co";
const PROD_BASE_URL: &str = "https://api.elections.kalshi.com";
const API_PREFIX: &str = "/trade-api/v2";
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Async REST client for Kalshi trade API.
#[derive(Debug, Clone)]
pub struct KalshiRestClient {
    client: reqwest::Client,
    auth: KalshiAuth,
    base_url: String,
}

impl KalshiRestClient {
    /// `KALSHI_API_BASE_URL` overrides the demo/prod choice when set.
    pub fn new(auth: KalshiAuth, use_demo: bool) -> Result<Self, Error> {
        let base_url = std::env::var("KALSHI_API_BASE_URL")
            .ok()
            .map(|raw| raw.trim().trim_end_matches('/').to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| {
                if use_demo { DEMO_BASE_URL } else { PROD_BASE_URL }.to_string()
            });

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        Ok(Self {
            client,
            auth,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sign, send, and decode one request. The signed path excludes the query.
    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&CreateOrderRequest>,
    ) -> Result<T, Error> {
        let full_path = format!("{}{}", API_PREFIX, path);
        let headers = self.auth.headers(method.as_str(), &full_path)?;

        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, full_path))
            .headers(headers);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{}: {}", full_path, format_reqwest_error(&e)))
            } else {
                Error::Http(format_reqwest_error(&e))
            }
        })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(DEFAULT_RETRY_AFTER_MS);
            warn!("Rate limited on {} (retry after {}ms)", full_path, retry_after_ms);
            return Err(Error::RateLimited { retry_after_ms });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::MarketNotFound(full_path));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::KalshiApi {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // ── Read endpoints ────────────────────────────────────────────────

    /// One page of markets matching the filter.
    pub async fn get_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketInfo>, Error> {
        let mut query = vec![("limit", filter.limit.max(1).to_string())];
        if let Some(series) = &filter.series_ticker {
            query.push(("series_ticker", series.clone()));
        }
        if let Some(status) = &filter.status {
            query.push(("status", status.clone()));
        }

        let body: MarketsResponse = self.send_json(Method::GET, "/markets", &query, None).await?;
        debug!(
            "Fetched {} markets (series={:?})",
            body.markets.len(),
            filter.series_ticker
        );
        Ok(body.markets)
    }

    pub async fn get_market(&self, ticker: &str) -> Result<MarketInfo, Error> {
        #[derive(Deserialize)]
        struct Wrapper {
            market: MarketInfo,
        }

        let w: Wrapper = self
            .send_json(Method::GET, &format!("/markets/{}", ticker), &[], None)
            .await?;
        Ok(w.market)
    }

    pub async fn get_orderbook(&self, ticker: &str) -> Result<OrderBook, Error> {
        let resp: OrderbookResponse = self
            .send_json(Method::GET, &format!("/markets/{}/orderbook", ticker), &[], None)
            .await?;
        Ok(resp.orderbook.into_book(ticker))
    }

    /// Portfolio balance in cents.
    pub async fn get_balance(&self) -> Result<i64, Error> {
        let bal: BalanceResponse = self
            .send_json(Method::GET, "/portfolio/balance", &[], None)
            .await?;
        Ok(bal.balance)
    }

    /// All portfolio positions, following the cursor.
    pub async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, Error> {
        let mut all_positions = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![("limit", "200".to_string())];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let body: PositionsResponse = self
                .send_json(Method::GET, "/portfolio/positions", &query, None)
                .await?;
            all_positions.extend(body.market_positions);

            match body.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        debug!("Fetched {} positions", all_positions.len());
        Ok(all_positions)
    }

    // ── Write endpoints ───────────────────────────────────────────────

    pub async fn create_order(&self, intent: &OrderIntent) -> Result<OrderInfo, Error> {
        let body = order_request(intent)?;

        debug!(
            "Creating order: {:?} {} {} @ {}¢ x{} ({})",
            intent.action, intent.side, intent.ticker, intent.price_cents, intent.count, intent.reason,
        );

        let resp: CreateOrderResponse = self
            .send_json(Method::POST, "/portfolio/orders", &[], Some(&body))
            .await?;

        debug!(
            "Order placed: id={} status={} fill={}",
            resp.order.order_id, resp.order.status, resp.order.fill_count,
        );
        Ok(resp.order)
    }
}

#[async_trait]
impl MarketService for KalshiRestClient {
    async fn list_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketInfo>, Error> {
        self.get_markets(filter).await
    }

    async fn get_market(&self, ticker: &str) -> Result<MarketInfo, Error> {
        KalshiRestClient::get_market(self, ticker).await
    }

    async fn get_orderbook(&self, ticker: &str) -> Result<OrderBook, Error> {
        KalshiRestClient::get_orderbook(self, ticker).await
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderInfo, Error> {
        self.create_order(intent).await
    }

    async fn get_balance(&self) -> Result<i64, Error> {
        KalshiRestClient::get_balance(self).await
    }

    async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, Error> {
        KalshiRestClient::get_positions(self).await
    }
}

fn order_request(intent: &OrderIntent) -> Result<CreateOrderRequest, Error> {
    if !(1..=99).contains(&intent.price_cents) {
        return Err(Error::Validation(format!(
            "limit price {}¢ outside 1-99 for {}",
            intent.price_cents, intent.ticker
        )));
    }
    if intent.count <= 0 {
        return Err(Error::Validation(format!(
            "order count {} must be positive for {}",
            intent.count, intent.ticker
        )));
    }

    let (yes_price, no_price) = match intent.side {
        Side::Yes => (Some(intent.price_cents), None),
        Side::No => (None, Some(intent.price_cents)),
    };

    Ok(CreateOrderRequest {
        ticker: intent.ticker.clone(),
        side: intent.side,
        action: intent.action,
        client_order_id: Uuid::new_v4().to_string(),
        count: intent.count,
        order_type: intent.order_type,
        yes_price,
        no_price,
    })
}

/// Kalshi only publishes resting bids per contract side, as `[price, count]`.
#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    orderbook: RawOrderbook,
}

#[derive(Debug, Default, Deserialize)]
struct RawOrderbook {
    #[serde(default)]
    yes: Option<Vec<[i64; 2]>>,
    #[serde(default)]
    no: Option<Vec<[i64; 2]>>,
}

impl RawOrderbook {
    /// A YES bid at p is a NO ask at 100 - p, and vice versa.
    fn into_book(self, ticker: &str) -> OrderBook {
        let yes_bids = levels_desc(self.yes.unwrap_or_default());
        let no_bids = levels_desc(self.no.unwrap_or_default());

        OrderBook {
            ticker: ticker.to_string(),
            yes: BookSide {
                asks: complement(&no_bids),
                bids: yes_bids.clone(),
            },
            no: BookSide {
                asks: complement(&yes_bids),
                bids: no_bids,
            },
        }
    }
}

fn levels_desc(raw: Vec<[i64; 2]>) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = raw
        .into_iter()
        .filter(|[price, count]| *price > 0 && *price < 100 && *count > 0)
        .map(|[price, count]| PriceLevel { price, count })
        .collect();
    levels.sort_by(|a, b| b.price.cmp(&a.price));
    levels
}

/// Best-first bids on one side become best-first asks on the other.
fn complement(bids: &[PriceLevel]) -> Vec<PriceLevel> {
    bids.iter()
        .map(|l| PriceLevel {
            price: 100 - l.price,
            count: l.count,
        })
        .collect()
}

/// Keeps chained causes so DNS/TLS/socket failures stay visible.
fn format_reqwest_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}
