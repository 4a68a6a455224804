//! Trading engine.
//!
//! One cycle runs four stages with a barrier between each: refresh the
//! portfolio and scan markets, analyze the most active markets in parallel,
//! size the resulting opportunities under the risk budget, then execute the
//! best few. Every venue call goes through the session pool and the shared
//! rate limiter; scans and order placement each sit behind a circuit breaker.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use common::config::{BotConfig, CacheConfig, EngineConfig};
use common::{
    Action, Error, MarketFilter, MarketInfo, MarketOpportunity, MarketService, NewOpportunity,
    OrderBook, OrderIntent, OrderType, PositionSnapshot, Result, Side,
};
use futures::future::join_all;
use resilience::{
    retry_with_backoff, BreakerState, CircuitBreaker, ConnectionPool, MetricsCollector,
    RateLimiter, RemoteStore, RetryPolicy, TtlCache,
};
use risk::{PortfolioSnapshot, Position, RiskManager, RiskReport};
use strategy::{signals, StrategyManager, WeightSource};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::performance::TradePerformance;
use crate::types::{
    CycleProgress, CycleReport, ExecutionOutcome, ExecutionRecord, ExecutionStats, Fill,
    HealthReport, HealthStatus, PaperLedger, PerformanceReport,
};

/// Cache key for the scanned market list.
pub const SCAN_CACHE_KEY: &str = "global_market_cache";

const METRICS_WINDOW: usize = 1000;
const NEUTRAL_REASONING: &str = "no strategy signal";
const FORCED_EDGE_CENTS: f64 = 5.0;

type Session = Arc<dyn MarketService>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn analysis_key(ticker: &str) -> String {
    format!("opp_{}", ticker)
}

pub struct TradingEngine {
    config: EngineConfig,
    cache_config: CacheConfig,
    pool: ConnectionPool<Session>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    cache: TtlCache,
    scan_breaker: CircuitBreaker,
    execution_breaker: CircuitBreaker,
    metrics: MetricsCollector,
    series_permits: Semaphore,
    analysis_permits: Semaphore,
    risk: Mutex<RiskManager>,
    strategies: StrategyManager,
    learner: Arc<dyn WeightSource>,
    portfolio: Mutex<PortfolioSnapshot>,
    paper: Mutex<PaperLedger>,
    executions: Mutex<VecDeque<ExecutionRecord>>,
    execution_stats: Mutex<ExecutionStats>,
    impact: Mutex<HashMap<String, VecDeque<i64>>>,
    performance: Mutex<TradePerformance>,
    trading_day: Mutex<NaiveDate>,
    shutdown: CancellationToken,
}

impl TradingEngine {
    pub fn new(
        config: &BotConfig,
        service: Arc<dyn MarketService>,
        strategies: StrategyManager,
        learner: Arc<dyn WeightSource>,
    ) -> Self {
        let engine = config.engine.clone();
        let pool = ConnectionPool::new(engine.pool_max_sessions, move || Ok(service.clone()));
        let limiter = RateLimiter::new(
            engine.max_concurrent_requests,
            Duration::from_millis(engine.min_request_interval_ms),
        );
        let retry = RetryPolicy {
            max_attempts: engine.fetch_attempts,
            base_delay: Duration::from_millis(engine.backoff_base_ms),
            rate_limit_delay: Duration::from_millis(engine.rate_limit_backoff_base_ms),
        };
        let scan_breaker = CircuitBreaker::new(
            "market_scan",
            engine.scan_breaker.failure_threshold,
            Duration::from_secs(engine.scan_breaker.recovery_timeout_secs),
        );
        let execution_breaker = CircuitBreaker::new(
            "order_execution",
            engine.execution_breaker.failure_threshold,
            Duration::from_secs(engine.execution_breaker.recovery_timeout_secs),
        );

        info!(
            "Trading engine ready: {} series, top {} per cycle, paper_mode={}",
            engine.target_series.len(),
            engine.top_n,
            engine.paper_mode
        );

        Self {
            cache: build_cache(&config.cache),
            cache_config: config.cache.clone(),
            pool,
            limiter,
            retry,
            scan_breaker,
            execution_breaker,
            metrics: MetricsCollector::new(METRICS_WINDOW),
            series_permits: Semaphore::new(engine.series_fetch_concurrency.max(1)),
            analysis_permits: Semaphore::new(engine.max_concurrent_analysis.max(1)),
            risk: Mutex::new(RiskManager::new(config.risk.clone())),
            strategies,
            learner,
            portfolio: Mutex::new(PortfolioSnapshot::default()),
            paper: Mutex::new(PaperLedger::default()),
            executions: Mutex::new(VecDeque::new()),
            execution_stats: Mutex::new(ExecutionStats::default()),
            impact: Mutex::new(HashMap::new()),
            performance: Mutex::new(TradePerformance::default()),
            trading_day: Mutex::new(Utc::now().date_naive()),
            shutdown: CancellationToken::new(),
            config: engine,
        }
    }

    /// Back the cache with a shared remote store.
    pub fn with_remote_cache(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.cache = build_cache(&self.cache_config).with_remote(remote);
        self
    }

    /// Root token; cancelling it stops the current cycle at the next await point.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn portfolio(&self) -> PortfolioSnapshot {
        *lock(&self.portfolio)
    }

    pub fn risk_report(&self) -> RiskReport {
        lock(&self.risk).get_risk_report()
    }

    pub fn recent_executions(&self) -> Vec<ExecutionRecord> {
        lock(&self.executions).iter().cloned().collect()
    }

    // ── Venue access ──────────────────────────────────────────────────

    /// One venue call under a pooled session and the shared rate limiter.
    async fn venue<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.pool.acquire().await?;
        let service: Session = (*session).clone();
        self.limiter.call(|| op(service)).await
    }

    async fn fetch_market(&self, ticker: &str, cancel: &CancellationToken) -> Result<MarketInfo> {
        let label = format!("get_market {}", ticker);
        retry_with_backoff(&self.retry, cancel, &label, || {
            self.venue(move |svc| async move { svc.get_market(ticker).await })
        })
        .await
    }

    async fn fetch_orderbook(&self, ticker: &str, cancel: &CancellationToken) -> Result<OrderBook> {
        let label = format!("get_orderbook {}", ticker);
        retry_with_backoff(&self.retry, cancel, &label, || {
            self.venue(move |svc| async move { svc.get_orderbook(ticker).await })
        })
        .await
    }

    async fn fetch_list(
        &self,
        filter: &MarketFilter,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<MarketInfo>> {
        retry_with_backoff(&self.retry, cancel, label, || {
            self.venue(move |svc| async move { svc.list_markets(filter).await })
        })
        .await
    }

    // ── Portfolio ─────────────────────────────────────────────────────

    /// Pull balance and positions and push them into the risk manager.
    /// On failure the previous snapshot is kept.
    pub async fn refresh_portfolio(&self, cancel: &CancellationToken) -> Result<PortfolioSnapshot> {
        self.sync_portfolio(cancel).await.map(|(snapshot, _)| snapshot)
    }

    /// Refresh the portfolio, closing resolved positions first. Paper mode
    /// reads cash from the simulated ledger instead of the venue.
    async fn sync_portfolio(&self, cancel: &CancellationToken) -> Result<(PortfolioSnapshot, usize)> {
        let (balance, positions) = tokio::join!(
            retry_with_backoff(&self.retry, cancel, "get_balance", || {
                self.venue(|svc| async move { svc.get_balance().await })
            }),
            retry_with_backoff(&self.retry, cancel, "get_positions", || {
                self.venue(|svc| async move { svc.get_positions().await })
            }),
        );

        let balance_cents = balance.map_err(|e| {
            warn!("Balance refresh failed, keeping last snapshot: {}", e);
            self.metrics.increment("portfolio_errors");
            e
        })?;

        let reported = if self.config.paper_mode {
            None
        } else {
            positions.as_deref().ok()
        };
        let resolved = self.resolve_positions(reported, cancel).await;

        let previous = self.portfolio();
        let venue_balance = balance_cents as f64 / 100.0;
        let (balance, active_exposure) = if self.config.paper_mode {
            let exposure = lock(&self.risk).positions().map(|p| p.exposure()).sum::<f64>();
            (lock(&self.paper).balance(venue_balance), exposure)
        } else {
            let exposure = match &positions {
                Ok(positions) => venue_exposure(positions),
                Err(e) => {
                    warn!("Positions refresh failed, keeping last exposure: {}", e);
                    previous.active_exposure
                }
            };
            (venue_balance, exposure)
        };

        let snapshot = PortfolioSnapshot {
            balance,
            active_exposure,
        };
        *lock(&self.portfolio) = snapshot;
        lock(&self.risk).update_portfolio_state(snapshot.balance, snapshot.active_exposure);
        debug!(
            "Portfolio: balance=${:.2} exposure=${:.2}",
            snapshot.balance, snapshot.active_exposure
        );
        Ok((snapshot, resolved))
    }

    /// Close tracked positions whose market has settled. With venue
    /// positions at hand, positions the venue no longer reports close at
    /// their last mark.
    async fn resolve_positions(
        &self,
        reported: Option<&[PositionSnapshot]>,
        cancel: &CancellationToken,
    ) -> usize {
        let open: Vec<Position> = lock(&self.risk).positions().cloned().collect();
        if open.is_empty() {
            return 0;
        }

        let markets = join_all(open.iter().map(|p| self.fetch_market(&p.ticker, cancel))).await;
        let mut resolved = 0;
        for (position, market) in open.iter().zip(markets) {
            let settled = match market {
                Ok(market) => market.settlement_price(position.side),
                Err(e) => {
                    debug!("No settlement check for {}: {}", position.ticker, e);
                    None
                }
            };
            let still_held = |held: &[PositionSnapshot]| {
                held.iter().any(|h| h.ticker == position.ticker && h.position != 0)
            };
            let exit_price = match (settled, reported) {
                (Some(price), _) => price,
                (None, Some(held)) if !still_held(held) => position.side_mark(),
                _ => continue,
            };

            let pnl = (exit_price - position.entry_price) as f64 * position.size as f64 / 100.0;
            info!(
                "Position resolved: {} {} x{} entry={}¢ exit={}¢ pnl=${:.2}",
                position.ticker, position.side, position.size, position.entry_price, exit_price, pnl
            );
            self.record_trade_outcome(&position.ticker, pnl, exit_price);
            resolved += 1;
        }
        if resolved > 0 {
            self.metrics.increment_by("positions_resolved", resolved as u64);
        }
        resolved
    }

    // ── Scan ──────────────────────────────────────────────────────────

    /// Tradeable markets across the target series, from cache when fresh.
    /// Empty when the scan breaker is open or every fetch failed.
    pub async fn scan_markets(&self, cancel: &CancellationToken) -> Vec<MarketInfo> {
        if let Some(markets) = self.cache.get_json::<Vec<MarketInfo>>(SCAN_CACHE_KEY).await {
            debug!("Scan cache hit ({} markets)", markets.len());
            self.metrics.increment("scan_cache_hits");
            return markets;
        }

        let scanned = self
            .metrics
            .time_operation("scan", self.scan_breaker.call(|| self.fetch_markets(cancel)))
            .await;

        match scanned {
            Ok(markets) => {
                info!("Scanned {} tradeable markets", markets.len());
                self.cache
                    .set_json(
                        SCAN_CACHE_KEY,
                        &markets,
                        Some(Duration::from_secs(self.config.scan_cache_ttl_secs)),
                    )
                    .await;
                markets
            }
            Err(Error::CircuitOpen(name)) => {
                warn!("Scan skipped, circuit '{}' is open", name);
                self.metrics.increment("scan_rejected");
                Vec::new()
            }
            Err(e) => {
                warn!("Market scan failed: {}", e);
                self.metrics.increment("scan_errors");
                Vec::new()
            }
        }
    }

    async fn fetch_markets(&self, cancel: &CancellationToken) -> Result<Vec<MarketInfo>> {
        let series = &self.config.target_series;
        let fetches = series.iter().map(|s| async move {
            let _permit = self
                .series_permits
                .acquire()
                .await
                .map_err(|_| Error::Cancelled)?;
            let filter = MarketFilter::open_in_series(s, self.config.series_fetch_limit);
            self.fetch_list(&filter, &format!("markets {}", s), cancel).await
        });
        let results = join_all(fetches).await;

        let mut seen = HashSet::new();
        let mut markets = Vec::new();
        let mut fetched_series = 0;
        let mut last_error = None;
        for (s, result) in series.iter().zip(results) {
            match result {
                Ok(batch) => {
                    fetched_series += 1;
                    markets.extend(batch.into_iter().filter(|m| seen.insert(m.ticker.clone())));
                }
                Err(e) => {
                    warn!("Series {} fetch failed: {}", s, e);
                    last_error = Some(e);
                }
            }
        }
        if let (0, Some(e)) = (fetched_series, last_error) {
            return Err(e);
        }

        if markets.len() < self.config.min_markets_before_fallback {
            let filter = MarketFilter::open(self.config.fallback_fetch_limit);
            match self.fetch_list(&filter, "markets (fallback)", cancel).await {
                Ok(batch) => {
                    markets.extend(batch.into_iter().filter(|m| seen.insert(m.ticker.clone())));
                }
                Err(e) if series.is_empty() => return Err(e),
                Err(e) => warn!("Fallback market fetch failed: {}", e),
            }
        }

        markets.retain(MarketInfo::is_tradeable);
        for market in &mut markets {
            market.mid_probability = (market.yes_bid + market.yes_ask) as f64 / 200.0;
            market.liquidity_score = market.volume_liquidity();
        }
        Ok(markets)
    }

    /// Re-mark open positions from freshly scanned quotes.
    fn mark_positions(&self, markets: &[MarketInfo]) {
        let mut risk = lock(&self.risk);
        let open: Vec<String> = risk.positions().map(|p| p.ticker.clone()).collect();
        for ticker in open {
            if let Some(market) = markets.iter().find(|m| m.ticker == ticker) {
                if market.mid_probability > 0.0 {
                    risk.update_position_price(&ticker, market.mid_probability * 100.0);
                }
            }
        }
    }

    // ── Analysis ──────────────────────────────────────────────────────

    /// The aggregated opportunity for one market, or the neutral placeholder
    /// when no strategy fires. `None` only when the market itself is unavailable.
    pub async fn analyze_market(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> Option<MarketOpportunity> {
        let key = analysis_key(ticker);
        if let Some(cached) = self.cache.get_json::<MarketOpportunity>(&key).await {
            self.metrics.increment("analysis_cache_hits");
            return Some(cached);
        }

        let _permit = self.analysis_permits.acquire().await.ok()?;
        if cancel.is_cancelled() {
            return None;
        }

        let started = Instant::now();
        let (market, book) = tokio::join!(
            self.fetch_market(ticker, cancel),
            self.fetch_orderbook(ticker, cancel)
        );
        let market = match market {
            Ok(market) => market,
            Err(e) => {
                warn!("Skipping analysis of {}: {}", ticker, e);
                self.metrics.increment("analysis_errors");
                return None;
            }
        };
        let book = book.unwrap_or_else(|e| {
            debug!("No order book for {}: {}", ticker, e);
            OrderBook::empty(ticker)
        });

        let signals = self
            .strategies
            .analyze_market(&market, &book, self.learner.as_ref())
            .await;
        let opportunity = self
            .strategies
            .aggregate_signals(signals)
            .unwrap_or_else(|| neutral_opportunity(&market));

        self.metrics
            .record("analysis_ms", started.elapsed().as_secs_f64() * 1000.0);
        self.cache
            .set_json(
                &key,
                &opportunity,
                Some(Duration::from_secs(self.config.analysis_cache_ttl_secs)),
            )
            .await;
        Some(opportunity)
    }

    /// Analyze the highest-volume markets concurrently.
    async fn analyze_markets(
        &self,
        markets: &[MarketInfo],
        cancel: &CancellationToken,
    ) -> Vec<MarketOpportunity> {
        let mut candidates: Vec<&MarketInfo> = markets.iter().collect();
        candidates.sort_by(|a, b| b.volume.cmp(&a.volume));
        candidates.truncate(self.config.max_parallel_analysis);

        join_all(candidates.iter().map(|m| self.analyze_market(&m.ticker, cancel)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Size every non-neutral opportunity and keep the top `top_n` by edge × confidence.
    fn select_opportunities(&self, analyzed: Vec<MarketOpportunity>) -> Vec<MarketOpportunity> {
        let portfolio = self.portfolio();
        let mut sized: Vec<MarketOpportunity> = {
            let mut risk = lock(&self.risk);
            analyzed
                .into_iter()
                .filter(|opp| !opp.is_neutral())
                .filter_map(|opp| {
                    let contracts = risk.check_trade_risk(&opp, &portfolio);
                    (contracts > 0).then(|| opp.with_suggested_size(contracts))
                })
                .collect()
        };
        sized.sort_by(|a, b| b.rank_key().total_cmp(&a.rank_key()));
        sized.truncate(self.config.top_n);
        sized
    }

    pub async fn find_best_opportunities(
        &self,
        markets: &[MarketInfo],
        cancel: &CancellationToken,
    ) -> Vec<MarketOpportunity> {
        let analyzed = self.analyze_markets(markets, cancel).await;
        self.select_opportunities(analyzed)
    }

    // ── Execution ─────────────────────────────────────────────────────

    fn impact_adjusted_price(&self, opp: &MarketOpportunity) -> i64 {
        let recent_fills = lock(&self.impact).get(opp.ticker()).map_or(0, VecDeque::len);
        if recent_fills > 0 {
            (opp.entry_price() + 1).min(99)
        } else {
            opp.entry_price()
        }
    }

    /// Buy `suggested_size` contracts at the opportunity's price, adjusted
    /// for our own recent fills.
    pub async fn execute_trade(&self, opp: &MarketOpportunity) -> ExecutionOutcome {
        let ticker = opp.ticker().to_string();
        let count = opp.suggested_size();
        if count == 0 {
            return self.finish(opp, reject(&ticker, "sized to zero contracts"));
        }

        let price = self.impact_adjusted_price(opp);
        if !(1..=99).contains(&price) {
            return self.finish(opp, reject(&ticker, &format!("price {}¢ out of range", price)));
        }

        let fill = |order_id: String| Fill {
            order_id,
            ticker: ticker.clone(),
            side: opp.side(),
            price_cents: price,
            count,
            sources: opp.sources().to_vec(),
            at: Utc::now(),
        };

        if self.config.paper_mode {
            info!(
                "PAPER ORDER: {} {} x{} @ {}¢ ({})",
                ticker,
                opp.side(),
                count,
                price,
                opp.reasoning()
            );
            let outcome = ExecutionOutcome::Simulated(fill(format!("paper-{}", Uuid::new_v4())));
            return self.finish(opp, outcome);
        }

        let intent = OrderIntent {
            ticker: ticker.clone(),
            side: opp.side(),
            action: Action::Buy,
            order_type: OrderType::Limit,
            price_cents: price,
            count: count as i64,
            reason: opp.reasoning().to_string(),
        };
        let intent = &intent;
        let placed = self
            .execution_breaker
            .call(|| self.venue(move |svc| async move { svc.place_order(intent).await }))
            .await;

        let outcome = match placed {
            Ok(order) => {
                info!(
                    "ORDER PLACED: {} {} x{} @ {}¢ (id={}, status={})",
                    ticker,
                    opp.side(),
                    count,
                    price,
                    order.order_id,
                    order.status
                );
                ExecutionOutcome::Placed(fill(order.order_id))
            }
            Err(Error::CircuitOpen(name)) => {
                reject(&ticker, &format!("circuit '{}' is open", name))
            }
            Err(e) => {
                warn!("Order for {} failed: {}", ticker, e);
                ExecutionOutcome::Failed {
                    ticker: ticker.clone(),
                    error: e.to_string(),
                }
            }
        };
        self.finish(opp, outcome)
    }

    /// Book a successful fill and count the outcome.
    fn finish(&self, opp: &MarketOpportunity, outcome: ExecutionOutcome) -> ExecutionOutcome {
        {
            let mut stats = lock(&self.execution_stats);
            match &outcome {
                ExecutionOutcome::Placed(fill) => {
                    stats.placed += 1;
                    stats.contracts += fill.count;
                }
                ExecutionOutcome::Simulated(fill) => {
                    stats.simulated += 1;
                    stats.contracts += fill.count;
                }
                ExecutionOutcome::Rejected { ticker, reason } => {
                    debug!("Execution rejected for {}: {}", ticker, reason);
                    stats.rejected += 1;
                }
                ExecutionOutcome::Failed { .. } => stats.failed += 1,
            }
        }

        let fill = match outcome.fill() {
            Some(fill) => fill.clone(),
            None => return outcome,
        };
        if matches!(outcome, ExecutionOutcome::Simulated(_)) {
            lock(&self.paper).debit(fill.cost());
        }

        let portfolio = self.portfolio();
        lock(&self.risk).record_trade(opp, fill.count, &portfolio);

        {
            let mut impact = lock(&self.impact);
            let history = impact.entry(fill.ticker.clone()).or_default();
            if history.len() >= self.config.impact_history_capacity.max(1) {
                history.pop_front();
            }
            history.push_back(fill.price_cents);
        }
        {
            let mut executions = lock(&self.executions);
            if executions.len() >= self.config.trade_history_capacity.max(1) {
                executions.pop_front();
            }
            executions.push_back(ExecutionRecord {
                fill: fill.clone(),
                paper: matches!(outcome, ExecutionOutcome::Simulated(_)),
                edge: opp.edge(),
                confidence: opp.confidence(),
            });
        }

        self.metrics.increment("orders_placed");
        self.metrics.increment_by("contracts_filled", fill.count);
        outcome
    }

    /// Place a small trade on `ticker` without consulting the strategies.
    /// The order is still sized and gated by the risk manager.
    pub async fn force_test_trade(
        &self,
        ticker: &str,
        side: Side,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let market = match self.fetch_market(ticker, cancel).await {
            Ok(market) => market,
            Err(e) => {
                return ExecutionOutcome::Failed {
                    ticker: ticker.to_string(),
                    error: e.to_string(),
                }
            }
        };
        let ask = market.ask_for(side);
        if ask <= 0 || ask >= 100 {
            return reject(ticker, &format!("no {} ask quoted", side));
        }

        let opp = MarketOpportunity::new(NewOpportunity {
            ticker: market.ticker.clone(),
            title: market.title.clone(),
            edge: FORCED_EDGE_CENTS,
            confidence: 0.5,
            side,
            entry_price: ask,
            reasoning: "forced test trade".into(),
            liquidity_score: market.volume_liquidity(),
            probability: ((ask as f64 + FORCED_EDGE_CENTS) / 100.0).min(0.99),
            correlation_group: signals::correlation_group(&market.ticker),
            ..Default::default()
        });

        let portfolio = self.portfolio();
        let sized = {
            let mut risk = lock(&self.risk);
            match risk.check_trade_risk(&opp, &portfolio) {
                0 => Err(risk
                    .last_rejection()
                    .map(|(_, reason)| reason.to_string())
                    .unwrap_or_else(|| "risk sized to zero".into())),
                contracts => Ok(contracts),
            }
        };
        match sized {
            Ok(contracts) => {
                info!("Forcing test trade on {} {} x{}", ticker, side, contracts);
                self.execute_trade(&opp.with_suggested_size(contracts)).await
            }
            Err(reason) => self.finish(&opp, reject(ticker, &reason)),
        }
    }

    // ── Cycle ─────────────────────────────────────────────────────────

    /// Run one full cycle under the configured timeout. Always returns a
    /// report, with whatever the cycle finished before a timeout or shutdown.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let cancel = self.shutdown.child_token();
        let mut progress = CycleProgress::default();
        self.roll_trading_day(started_at);

        let timed_out = tokio::time::timeout(
            Duration::from_secs(self.config.cycle_timeout_secs),
            self.run_stages(&cancel, &mut progress),
        )
        .await
        .is_err();
        if timed_out {
            cancel.cancel();
            warn!(
                "Cycle {} timed out after {}s",
                cycle_id, self.config.cycle_timeout_secs
            );
            self.metrics.increment("cycle_timeouts");
        }

        let health = self.check_health().await;
        let duration = started.elapsed();
        self.metrics.record("cycle_ms", duration.as_secs_f64() * 1000.0);
        self.metrics.increment("cycles");

        let report = CycleReport {
            cycle_id,
            started_at,
            duration_ms: duration.as_millis() as u64,
            markets_scanned: progress.markets_scanned,
            markets_analyzed: progress.markets_analyzed,
            opportunities: progress.opportunities,
            executions: progress.executions,
            positions_resolved: progress.positions_resolved,
            timed_out,
            cancelled: self.shutdown.is_cancelled(),
            health,
        };
        info!(
            "Cycle {} done in {}ms: scanned={} analyzed={} opportunities={} fills={} resolved={}",
            report.cycle_id,
            report.duration_ms,
            report.markets_scanned,
            report.markets_analyzed,
            report.opportunities,
            report.fills().count(),
            report.positions_resolved
        );
        report
    }

    /// Reset the daily loss budget on a new UTC day, and the weekly one on a new ISO week.
    fn roll_trading_day(&self, now: DateTime<Utc>) {
        let today = now.date_naive();
        let previous = std::mem::replace(&mut *lock(&self.trading_day), today);
        if previous == today {
            return;
        }
        let mut risk = lock(&self.risk);
        risk.reset_daily_metrics();
        if previous.iso_week() != today.iso_week() {
            risk.reset_weekly_metrics();
            info!("New trading week {}", today);
        } else {
            info!("New trading day {}", today);
        }
    }

    async fn run_stages(&self, cancel: &CancellationToken, progress: &mut CycleProgress) {
        match self.sync_portfolio(cancel).await {
            Ok((_, resolved)) => progress.positions_resolved = resolved,
            Err(e) => debug!("Continuing cycle on last portfolio snapshot: {}", e),
        }

        let markets = self.scan_markets(cancel).await;
        progress.markets_scanned = markets.len();
        self.mark_positions(&markets);
        if cancel.is_cancelled() {
            return;
        }

        let analyzed = self.analyze_markets(&markets, cancel).await;
        progress.markets_analyzed = analyzed.len();

        let best = self.select_opportunities(analyzed);
        progress.opportunities = best.len();

        for opp in &best {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.execute_trade(opp).await;
            progress.executions.push(outcome);
        }
    }

    // ── Feedback and reporting ────────────────────────────────────────

    /// Book a resolved trade everywhere it matters: risk, performance,
    /// per-strategy stats, and the learner. `exit_price` is the cents one
    /// contract on the held side paid out.
    pub fn record_trade_outcome(&self, ticker: &str, pnl: f64, exit_price: i64) {
        let closed = lock(&self.risk).record_trade_result(ticker, pnl, exit_price);
        let contracts = closed.as_ref().map_or(0, |p| p.size);
        lock(&self.performance).record(pnl, contracts);
        if self.config.paper_mode && contracts > 0 {
            lock(&self.paper).credit(contracts as f64 * exit_price as f64 / 100.0);
        }

        let sources = lock(&self.executions)
            .iter()
            .rev()
            .find(|r| r.fill.ticker == ticker)
            .map(|r| r.fill.sources.clone())
            .unwrap_or_default();

        let note = format!("exit {}¢, pnl ${:.2}", exit_price, pnl);
        for kind in sources {
            self.strategies.record_strategy_result(kind, pnl);
            if let Err(e) = self.learner.record_outcome(ticker, kind, pnl, &note) {
                warn!("Learner update failed for {}: {}", kind, e);
            }
        }
    }

    pub async fn check_health(&self) -> HealthReport {
        let (remote_cache_latency_ms, remote_cache_error) = match self.cache.remote_latency().await {
            None => (None, None),
            Some(Ok(latency)) => (Some(latency.as_secs_f64() * 1000.0), None),
            Some(Err(e)) => {
                warn!("Remote cache unreachable, serving from local tier: {}", e);
                (None, Some(e.to_string()))
            }
        };
        let scan_breaker = self.scan_breaker.state();
        let execution_breaker = self.execution_breaker.state();
        let risk_circuits = lock(&self.risk).circuits();

        let degraded = scan_breaker != BreakerState::Closed
            || execution_breaker != BreakerState::Closed
            || remote_cache_error.is_some()
            || risk_circuits.first_tripped().is_some();

        HealthReport {
            status: if degraded {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            scan_breaker,
            execution_breaker,
            risk_circuits,
            cache_hit_rate: self.cache.hit_rate(),
            remote_cache_latency_ms,
            remote_cache_error,
            metrics: self.metrics.summary(),
        }
    }

    pub fn performance_report(&self) -> PerformanceReport {
        let trades = lock(&self.performance).clone();
        let mut execution = lock(&self.execution_stats).clone();
        execution.recorded = lock(&self.executions).len();
        let profit_factor = Some(trades.profit_factor()).filter(|pf| pf.is_finite());

        PerformanceReport {
            win_rate: trades.win_rate(),
            profit_factor,
            trades,
            execution,
            risk: self.risk_report(),
            strategies: self.strategies.get_strategy_stats(),
            cache: self.cache.stats(),
            metrics: self.metrics.summary(),
        }
    }
}

fn build_cache(config: &CacheConfig) -> TtlCache {
    TtlCache::new(
        Duration::from_secs(config.default_ttl_secs),
        config.local_max_entries,
        Duration::from_millis(config.remote_timeout_ms),
    )
}

/// Cost basis of venue-reported positions in USD.
fn venue_exposure(positions: &[PositionSnapshot]) -> f64 {
    positions
        .iter()
        .map(|p| p.market_exposure.abs() as f64 / 100.0)
        .sum()
}

fn reject(ticker: &str, reason: &str) -> ExecutionOutcome {
    ExecutionOutcome::Rejected {
        ticker: ticker.to_string(),
        reason: reason.to_string(),
    }
}

/// Placeholder for a market no strategy had a view on.
fn neutral_opportunity(market: &MarketInfo) -> MarketOpportunity {
    let mid = market.mid_price();
    MarketOpportunity::new(NewOpportunity {
        ticker: market.ticker.clone(),
        title: market.title.clone(),
        edge: 0.0,
        confidence: 0.0,
        side: Side::Yes,
        entry_price: (mid * 100.0).round() as i64,
        suggested_size: 0,
        reasoning: NEUTRAL_REASONING.into(),
        liquidity_score: 0.5,
        probability: mid,
        correlation_group: signals::correlation_group(&market.ticker),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{OrderInfo, StrategyKind};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use strategy::NeutralWeights;

    const TICKER: &str = "KXECON-TEST";

    #[derive(Default)]
    struct MockVenue {
        markets: Mutex<Vec<MarketInfo>>,
        positions: Mutex<Vec<PositionSnapshot>>,
        balance_cents: i64,
        fail_listing: AtomicBool,
        slow_market: bool,
        list_calls: AtomicUsize,
        orders: Mutex<Vec<OrderIntent>>,
    }

    #[async_trait]
    impl MarketService for MockVenue {
        async fn list_markets(&self, _filter: &MarketFilter) -> Result<Vec<MarketInfo>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(Error::Validation("listing unavailable".into()));
            }
            Ok(lock(&self.markets).clone())
        }

        async fn get_market(&self, ticker: &str) -> Result<MarketInfo> {
            if self.slow_market {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            lock(&self.markets)
                .iter()
                .find(|m| m.ticker == ticker)
                .cloned()
                .ok_or_else(|| Error::MarketNotFound(ticker.to_string()))
        }

        async fn get_orderbook(&self, ticker: &str) -> Result<OrderBook> {
            Ok(OrderBook::empty(ticker))
        }

        async fn place_order(&self, intent: &OrderIntent) -> Result<OrderInfo> {
            lock(&self.orders).push(intent.clone());
            Ok(OrderInfo {
                order_id: "ord-1".into(),
                client_order_id: String::new(),
                ticker: intent.ticker.clone(),
                side: intent.side,
                action: intent.action,
                order_type: intent.order_type,
                status: "resting".into(),
                yes_price: 0,
                no_price: intent.price_cents,
                fill_count: 0,
                remaining_count: intent.count,
            })
        }

        async fn get_balance(&self) -> Result<i64> {
            Ok(self.balance_cents)
        }

        async fn get_positions(&self) -> Result<Vec<PositionSnapshot>> {
            Ok(lock(&self.positions).clone())
        }
    }

    fn cheap_no_market() -> MarketInfo {
        MarketInfo {
            ticker: TICKER.into(),
            title: "Economy test market".into(),
            status: "open".into(),
            yes_bid: 40,
            yes_ask: 42,
            no_bid: 58,
            no_ask: 58,
            last_price: 41,
            volume: 10_000,
            ..Default::default()
        }
    }

    fn test_config(paper_mode: bool) -> BotConfig {
        let mut config = BotConfig::default();
        config.engine.target_series = vec!["KXECON".into()];
        config.engine.min_markets_before_fallback = 1;
        config.engine.min_request_interval_ms = 0;
        config.engine.paper_mode = paper_mode;
        config
    }

    fn engine_with(config: &BotConfig, venue: Arc<MockVenue>) -> TradingEngine {
        let strategies =
            StrategyManager::from_config(&config.strategy, &config.news, None);
        TradingEngine::new(config, venue, strategies, Arc::new(NeutralWeights))
    }

    fn venue(markets: Vec<MarketInfo>) -> Arc<MockVenue> {
        Arc::new(MockVenue {
            markets: Mutex::new(markets),
            balance_cents: 10_000,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_end_to_end_paper_cycle() {
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![cheap_no_market()]));

        let report = engine.run_cycle().await;

        assert!(!report.timed_out);
        assert_eq!(report.markets_scanned, 1);
        assert_eq!(report.markets_analyzed, 1);
        assert_eq!(report.opportunities, 1);
        let fills: Vec<&Fill> = report.fills().collect();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, Side::No);
        assert_eq!(fills[0].price_cents, 58);
        assert_eq!(fills[0].count, 2);
        assert_eq!(fills[0].sources, vec![StrategyKind::Fundamental]);
        assert!(matches!(report.executions[0], ExecutionOutcome::Simulated(_)));

        let risk = engine.risk_report();
        assert_eq!(risk.trade_counts.total_history, 1);
        assert_eq!(risk.active_positions, 1);
        assert_eq!(engine.metrics().counter("orders_placed"), 1);
        assert_eq!(engine.metrics().counter("contracts_filled"), 2);
        assert_eq!(report.health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_live_cycle_routes_limit_order() {
        let config = test_config(false);
        let mock = venue(vec![cheap_no_market()]);
        let engine = engine_with(&config, mock.clone());

        let report = engine.run_cycle().await;

        assert!(matches!(report.executions[0], ExecutionOutcome::Placed(_)));
        let orders = lock(&mock.orders);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, Side::No);
        assert_eq!(orders[0].action, Action::Buy);
        assert_eq!(orders[0].order_type, OrderType::Limit);
        assert_eq!(orders[0].price_cents, 58);
        assert_eq!(orders[0].count, 2);
    }

    #[tokio::test]
    async fn test_scan_is_cached() {
        let config = test_config(true);
        let mock = venue(vec![cheap_no_market()]);
        let engine = engine_with(&config, mock.clone());
        let cancel = CancellationToken::new();

        assert_eq!(engine.scan_markets(&cancel).await.len(), 1);
        assert_eq!(engine.scan_markets(&cancel).await.len(), 1);
        assert_eq!(mock.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scan_enriches_and_filters() {
        let closed = MarketInfo {
            ticker: "KXECON-CLOSED".into(),
            status: "closed".into(),
            ..cheap_no_market()
        };
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![cheap_no_market(), closed]));

        let markets = engine.scan_markets(&CancellationToken::new()).await;
        assert_eq!(markets.len(), 1);
        assert!((markets[0].mid_probability - 0.41).abs() < 1e-9);
        assert_eq!(markets[0].liquidity_score, 1.0);
    }

    #[tokio::test]
    async fn test_fallback_fetch_when_series_thin() {
        let mut config = test_config(true);
        config.engine.min_markets_before_fallback = 10;
        let mock = venue(vec![cheap_no_market()]);
        let engine = engine_with(&config, mock.clone());

        let markets = engine.scan_markets(&CancellationToken::new()).await;
        assert_eq!(mock.list_calls.load(Ordering::SeqCst), 2);
        assert_eq!(markets.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_failures_open_breaker() {
        let config = test_config(true);
        let mock = venue(vec![cheap_no_market()]);
        mock.fail_listing.store(true, Ordering::SeqCst);
        let engine = engine_with(&config, mock.clone());
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            assert!(engine.scan_markets(&cancel).await.is_empty());
        }
        assert_eq!(mock.list_calls.load(Ordering::SeqCst), 3);

        assert!(engine.scan_markets(&cancel).await.is_empty());
        assert_eq!(mock.list_calls.load(Ordering::SeqCst), 3);

        let health = engine.check_health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.scan_breaker, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_missing_market_yields_no_analysis() {
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![]));
        let opp = engine.analyze_market("NOPE-1", &CancellationToken::new()).await;
        assert!(opp.is_none());
        assert_eq!(engine.metrics().counter("analysis_errors"), 1);
    }

    #[tokio::test]
    async fn test_quiet_market_gets_neutral_opportunity() {
        let quiet = MarketInfo {
            ticker: "KXECON-QUIET".into(),
            status: "open".into(),
            yes_bid: 49,
            yes_ask: 51,
            no_ask: 51,
            last_price: 50,
            volume: 10_000,
            ..Default::default()
        };
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![quiet]));
        let opp = engine
            .analyze_market("KXECON-QUIET", &CancellationToken::new())
            .await
            .unwrap();
        assert!(opp.is_neutral());
        assert_eq!(opp.reasoning(), NEUTRAL_REASONING);
        assert_eq!(opp.entry_price(), 50);
        assert_eq!(opp.suggested_size(), 0);
    }

    #[tokio::test]
    async fn test_repeat_fill_pays_impact() {
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![]));
        let opp = MarketOpportunity::new(NewOpportunity {
            ticker: TICKER.into(),
            side: Side::No,
            entry_price: 58,
            suggested_size: 3,
            ..Default::default()
        });

        let first = engine.execute_trade(&opp).await;
        let second = engine.execute_trade(&opp).await;
        assert_eq!(first.fill().unwrap().price_cents, 58);
        assert_eq!(second.fill().unwrap().price_cents, 59);
        assert_eq!(engine.recent_executions().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_size_rejected() {
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![]));
        let opp = MarketOpportunity::new(NewOpportunity {
            ticker: TICKER.into(),
            entry_price: 50,
            ..Default::default()
        });
        let outcome = engine.execute_trade(&opp).await;
        assert!(matches!(outcome, ExecutionOutcome::Rejected { .. }));
        assert_eq!(engine.performance_report().execution.rejected, 1);
    }

    #[tokio::test]
    async fn test_trade_outcome_feeds_back() {
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![cheap_no_market()]));
        engine.run_cycle().await;

        engine.record_trade_outcome(TICKER, 0.84, 0);

        let report = engine.performance_report();
        assert_eq!(report.trades.total_trades, 1);
        assert_eq!(report.trades.wins, 1);
        assert_eq!(report.trades.total_volume, 2);
        assert_eq!(report.risk.active_positions, 0);
        assert_eq!(
            report.strategies.performance[&StrategyKind::Fundamental].trades,
            1
        );
    }

    #[tokio::test]
    async fn test_paper_win_raises_equity() {
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![cheap_no_market()]));
        let cancel = CancellationToken::new();
        engine.run_cycle().await;

        // 2 NO @ 58¢ moved $1.16 from cash into exposure.
        let held = engine.refresh_portfolio(&cancel).await.unwrap();
        assert!((held.balance - 98.84).abs() < 1e-9);
        assert!((held.active_exposure - 1.16).abs() < 1e-9);
        assert_eq!(engine.risk_report().current_drawdown, 0.0);

        engine.record_trade_outcome(TICKER, 0.84, 100);
        let settled = engine.refresh_portfolio(&cancel).await.unwrap();
        assert!((settled.balance - 100.84).abs() < 1e-9);
        assert_eq!(settled.active_exposure, 0.0);

        let risk = engine.risk_report();
        assert!((risk.peak_equity - 100.84).abs() < 1e-9);
        assert_eq!(risk.current_drawdown, 0.0);
        assert!(risk.circuit_breakers.first_tripped().is_none());
    }

    #[tokio::test]
    async fn test_settled_market_resolves_position_next_cycle() {
        let config = test_config(true);
        let mock = venue(vec![cheap_no_market()]);
        let engine = engine_with(&config, mock.clone());
        let first = engine.run_cycle().await;
        assert_eq!(first.fills().count(), 1);
        assert_eq!(first.positions_resolved, 0);

        lock(&mock.markets)[0] = MarketInfo {
            status: "settled".into(),
            result: "no".into(),
            ..cheap_no_market()
        };
        let second = engine.run_cycle().await;

        assert_eq!(second.positions_resolved, 1);
        assert_eq!(engine.metrics().counter("positions_resolved"), 1);
        let report = engine.performance_report();
        assert_eq!(report.trades.total_trades, 1);
        assert_eq!(report.trades.wins, 1);
        assert!((report.trades.total_pnl - 0.84).abs() < 1e-9);
        assert!((report.risk.realized_pnl - 0.84).abs() < 1e-9);
        assert_eq!(
            report.strategies.performance[&StrategyKind::Fundamental].trades,
            1
        );
        // The $2.00 payout landed in paper cash before anything else traded.
        assert!((engine.portfolio().balance - 100.84).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_live_position_closes_when_venue_drops_it() {
        let config = test_config(false);
        let mock = venue(vec![cheap_no_market()]);
        let engine = engine_with(&config, mock.clone());
        let cancel = CancellationToken::new();
        engine.run_cycle().await;
        assert_eq!(engine.risk_report().active_positions, 1);

        *lock(&mock.positions) = vec![PositionSnapshot {
            ticker: TICKER.into(),
            position: -2,
            market_exposure: 116,
            realized_pnl: 0,
        }];
        let held = engine.refresh_portfolio(&cancel).await.unwrap();
        assert!((held.active_exposure - 1.16).abs() < 1e-9);
        assert_eq!(engine.risk_report().active_positions, 1);

        lock(&mock.positions).clear();
        engine.refresh_portfolio(&cancel).await.unwrap();
        let report = engine.performance_report();
        assert_eq!(report.risk.active_positions, 0);
        assert_eq!(report.trades.total_trades, 1);
        // Closed at the entry mark.
        assert_eq!(report.trades.total_pnl, 0.0);
    }

    #[tokio::test]
    async fn test_force_test_trade_sized_by_risk() {
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![cheap_no_market()]));
        let cancel = CancellationToken::new();
        engine.refresh_portfolio(&cancel).await.unwrap();

        let outcome = engine.force_test_trade(TICKER, Side::Yes, &cancel).await;
        let fill = outcome.fill().expect("filled");
        assert_eq!(fill.price_cents, 42);
        assert!(fill.count > 0);
        assert!(fill.sources.is_empty());
    }

    #[test]
    fn test_day_rollover_resets_loss_budgets() {
        let config = test_config(true);
        let engine = engine_with(&config, venue(vec![]));
        engine.record_trade_outcome(TICKER, -5.0, 0);

        engine.roll_trading_day(Utc::now());
        assert_eq!(engine.risk_report().daily_pnl, -5.0);

        engine.roll_trading_day(Utc::now() + chrono::Duration::days(7));
        let report = engine.risk_report();
        assert_eq!(report.daily_pnl, 0.0);
        assert_eq!(report.weekly_pnl, 0.0);
        assert_eq!(report.realized_pnl, -5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_timeout_still_reports() {
        let mut config = test_config(true);
        config.engine.cycle_timeout_secs = 5;
        let mock = Arc::new(MockVenue {
            markets: Mutex::new(vec![cheap_no_market()]),
            balance_cents: 10_000,
            slow_market: true,
            ..Default::default()
        });
        let engine = engine_with(&config, mock);

        let report = engine.run_cycle().await;
        assert!(report.timed_out);
        assert_eq!(report.markets_scanned, 1);
        assert_eq!(report.markets_analyzed, 0);
        assert!(report.executions.is_empty());
    }
}
