//! Risk manager: sizing gates, circuit breakers, and trade bookkeeping.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::Utc;
use common::config::RiskConfig;
use common::{MarketOpportunity, Side};
use tracing::{debug, info, warn};

use crate::types::{
    CircuitStates, PortfolioSnapshot, Position, RiskLevel, RiskRejection, RiskReport, TradeCounts,
    TradeRecord,
};

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);
const DEFAULT_VOLATILITY: f64 = 0.15;
const MIN_RETURNS_FOR_VOLATILITY: usize = 10;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

pub struct RiskManager {
    config: RiskConfig,
    positions: HashMap<String, Position>,
    trade_history: VecDeque<TradeRecord>,
    last_trade: HashMap<String, Instant>,
    /// Trade times within the last day, oldest first.
    recent_trades: VecDeque<Instant>,
    price_history: HashMap<String, VecDeque<f64>>,
    volatility: f64,
    daily_pnl: f64,
    weekly_pnl: f64,
    realized_pnl: f64,
    peak_equity: f64,
    current_drawdown: f64,
    intraday_drawdown: f64,
    circuits: CircuitStates,
    last_rejection: Option<(String, RiskRejection)>,
    rejection_counts: BTreeMap<String, u64>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            positions: HashMap::new(),
            trade_history: VecDeque::new(),
            last_trade: HashMap::new(),
            recent_trades: VecDeque::new(),
            price_history: HashMap::new(),
            volatility: DEFAULT_VOLATILITY,
            daily_pnl: 0.0,
            weekly_pnl: 0.0,
            realized_pnl: 0.0,
            peak_equity: 0.0,
            current_drawdown: 0.0,
            intraday_drawdown: 0.0,
            circuits: CircuitStates::default(),
            last_rejection: None,
            rejection_counts: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    // ── Portfolio state ───────────────────────────────────────────────

    /// Recompute peak, drawdowns, and every circuit from a fresh snapshot.
    pub fn update_portfolio_state(&mut self, balance: f64, active_exposure: f64) {
        let equity = balance + active_exposure;
        if equity > self.peak_equity {
            self.peak_equity = equity;
            self.intraday_drawdown = 0.0;
        }
        self.current_drawdown = if self.peak_equity > 0.0 {
            ((self.peak_equity - equity) / self.peak_equity).max(0.0)
        } else {
            0.0
        };
        self.intraday_drawdown = self.intraday_drawdown.max(self.current_drawdown);

        self.refresh_circuits(Instant::now());
    }

    fn refresh_circuits(&mut self, now: Instant) {
        let before = self.circuits;
        let loss_base = self.peak_equity.max(1.0);

        self.circuits.daily_loss = self.daily_pnl < -self.config.max_daily_loss_usd
            || (self.daily_pnl < 0.0 && -self.daily_pnl / loss_base > self.config.max_daily_loss_pct)
            || self.weekly_pnl < -self.config.max_weekly_loss_usd;
        self.circuits.drawdown = self.current_drawdown > self.config.max_drawdown_limit
            || self.intraday_drawdown > self.config.max_intraday_drawdown;

        let (hourly, daily) = self.trade_counts(now);
        self.circuits.frequency =
            hourly >= self.config.max_trades_per_hour || daily >= self.config.max_trades_per_day;

        if self.circuits.daily_loss && !before.daily_loss {
            warn!(
                "RISK CIRCUIT: daily loss tripped (daily={:.2} weekly={:.2})",
                self.daily_pnl, self.weekly_pnl
            );
        }
        if self.circuits.drawdown && !before.drawdown {
            warn!(
                "RISK CIRCUIT: drawdown tripped (current={:.1}% intraday={:.1}%)",
                self.current_drawdown * 100.0,
                self.intraday_drawdown * 100.0
            );
        }
        if self.circuits.frequency && !before.frequency {
            warn!("RISK CIRCUIT: trade frequency tripped ({} last hour, {} last day)", hourly, daily);
        }
    }

    /// Trades within the last hour and the last day.
    fn trade_counts(&mut self, now: Instant) -> (usize, usize) {
        while self
            .recent_trades
            .front()
            .is_some_and(|t| now.duration_since(*t) >= DAY)
        {
            self.recent_trades.pop_front();
        }
        (
            count_since(&self.recent_trades, now, HOUR),
            self.recent_trades.len(),
        )
    }

    // ── Sizing ────────────────────────────────────────────────────────

    /// Contracts to trade for `opp`, 0 when rejected. The reason for a
    /// rejection is logged and kept for diagnostics.
    pub fn check_trade_risk(&mut self, opp: &MarketOpportunity, portfolio: &PortfolioSnapshot) -> u64 {
        match self.evaluate_at(opp, portfolio, Instant::now()) {
            Ok(contracts) => {
                info!(
                    "RISK APPROVED: {} {} x{} @ {}¢ (edge={:.2} conf={:.2})",
                    opp.ticker(),
                    opp.side(),
                    contracts,
                    opp.entry_price(),
                    opp.edge(),
                    opp.confidence()
                );
                contracts
            }
            Err(reason) => {
                debug!("RISK REJECTED: {} {}: {}", opp.ticker(), opp.side(), reason);
                *self.rejection_counts.entry(reason.kind().to_string()).or_insert(0) += 1;
                self.last_rejection = Some((opp.ticker().to_string(), reason));
                0
            }
        }
    }

    /// Non-recording sizing. Same gates, same result as [`check_trade_risk`].
    ///
    /// [`check_trade_risk`]: RiskManager::check_trade_risk
    pub fn evaluate_trade(
        &self,
        opp: &MarketOpportunity,
        portfolio: &PortfolioSnapshot,
    ) -> Result<u64, RiskRejection> {
        self.evaluate_at(opp, portfolio, Instant::now())
    }

    fn evaluate_at(
        &self,
        opp: &MarketOpportunity,
        portfolio: &PortfolioSnapshot,
        now: Instant,
    ) -> Result<u64, RiskRejection> {
        let cfg = &self.config;

        // (a) Circuits.
        if let Some(circuit) = self.circuits.first_tripped() {
            return Err(RiskRejection::CircuitOpen(circuit));
        }

        // (b) Signal quality floors.
        if opp.edge() < cfg.min_edge {
            return Err(RiskRejection::EdgeTooLow { edge: opp.edge(), min: cfg.min_edge });
        }
        if opp.confidence() < cfg.min_confidence {
            return Err(RiskRejection::ConfidenceTooLow {
                confidence: opp.confidence(),
                min: cfg.min_confidence,
            });
        }
        if opp.liquidity_score() < cfg.min_liquidity {
            return Err(RiskRejection::LiquidityTooLow {
                liquidity: opp.liquidity_score(),
                min: cfg.min_liquidity,
            });
        }

        // (c) Per-ticker cooldown.
        let cooldown = Duration::from_secs(cfg.cooldown_minutes * 60);
        if let Some(last) = self.last_trade.get(opp.ticker()) {
            let since = now.saturating_duration_since(*last);
            if since < cooldown {
                return Err(RiskRejection::Cooldown {
                    remaining_secs: (cooldown - since).as_secs(),
                });
            }
        }

        // (d) Price sanity.
        let price_cents = opp.entry_price();
        if price_cents <= 0 || price_cents >= 100 {
            return Err(RiskRejection::InvalidPrice(price_cents));
        }
        let price = price_cents as f64;

        // (e) Kelly fraction with net odds b = (100 - price) / price.
        let p = opp.probability();
        let b = (100.0 - price) / price;
        let kelly = p - (1.0 - p) / b;
        if kelly <= 0.0 {
            return Err(RiskRejection::NonPositiveKelly(kelly));
        }

        // (f) Fractional Kelly within bounds.
        let mut fraction = (kelly * cfg.kelly_multiplier)
            .clamp(cfg.min_kelly_fraction, cfg.max_kelly_fraction);

        // (g) Volatility.
        fraction *= self.volatility_factor();

        // (h) Allocation caps.
        fraction = fraction.min(cfg.max_single_trade_allocation.min(cfg.max_portfolio_allocation));

        // (i) Dollars to contracts.
        let dollars = (portfolio.balance * fraction).min(cfg.max_position_size_usd);
        let mut contracts = (dollars * 100.0 / price).floor().max(0.0) as u64;

        // (j) Correlation-group concentration.
        let group = opp.correlation_group();
        let exposure = self.group_exposure(group);
        let cap = portfolio.balance * cfg.max_concentration;
        let position_value = contracts as f64 * price / 100.0;
        if exposure + position_value > cap {
            let available = cap - exposure;
            if available <= 0.0 {
                return Err(RiskRejection::ConcentrationLimit(group.to_string()));
            }
            contracts = contracts.min((available * 100.0 / price).floor() as u64);
        }

        // (k) Minimum size.
        if contracts < 1 {
            return Err(RiskRejection::BelowMinimumSize);
        }
        Ok(contracts)
    }

    fn volatility_factor(&self) -> f64 {
        let threshold = self.config.max_volatility_threshold;
        if self.config.volatility_adjustment && self.volatility > threshold && self.volatility > 0.0 {
            threshold / self.volatility
        } else {
            1.0
        }
    }

    fn group_exposure(&self, group: &str) -> f64 {
        self.positions
            .values()
            .filter(|p| p.correlation_group == group)
            .map(Position::exposure)
            .sum()
    }

    // ── Bookkeeping ───────────────────────────────────────────────────

    pub fn record_trade(
        &mut self,
        opp: &MarketOpportunity,
        contracts: u64,
        portfolio: &PortfolioSnapshot,
    ) {
        let now = Instant::now();
        let ticker = opp.ticker().to_string();
        let risk_level = self.assess_risk_level(opp, contracts, portfolio);

        let merged = match self.positions.get_mut(&ticker) {
            Some(existing) if existing.side == opp.side() => {
                let total = existing.size + contracts;
                let cost = existing.size as f64 * existing.entry_price as f64
                    + contracts as f64 * opp.entry_price() as f64;
                existing.entry_price = (cost / total.max(1) as f64).round() as i64;
                existing.size = total;
                true
            }
            _ => false,
        };
        if !merged {
            let mark = match opp.side() {
                Side::Yes => opp.entry_price() as f64,
                Side::No => (100 - opp.entry_price()) as f64,
            };
            self.positions.insert(
                ticker.clone(),
                Position {
                    ticker: ticker.clone(),
                    side: opp.side(),
                    size: contracts,
                    entry_price: opp.entry_price(),
                    entry_time: Utc::now(),
                    correlation_group: opp.correlation_group().to_string(),
                    current_price: mark,
                    unrealized_pnl: 0.0,
                },
            );
        }

        self.last_trade.insert(ticker.clone(), now);
        self.recent_trades.push_back(now);

        if self.trade_history.len() >= self.config.trade_history_capacity.max(1) {
            self.trade_history.pop_front();
        }
        self.trade_history.push_back(TradeRecord {
            ticker: ticker.clone(),
            side: opp.side(),
            size: contracts,
            entry_price: opp.entry_price(),
            exit_price: None,
            pnl: None,
            risk_level,
            opened_at: Utc::now(),
        });

        self.refresh_circuits(now);
        info!(
            "Trade recorded: {} {} x{} @ {}¢ (risk={:?})",
            ticker,
            opp.side(),
            contracts,
            opp.entry_price(),
            risk_level
        );
    }

    /// Bands evaluated top-down on allocation share and edge.
    fn assess_risk_level(
        &self,
        opp: &MarketOpportunity,
        contracts: u64,
        portfolio: &PortfolioSnapshot,
    ) -> RiskLevel {
        let position_value = contracts as f64 * opp.entry_price() as f64 / 100.0;
        let allocation = if portfolio.balance > 0.0 {
            position_value / portfolio.balance
        } else {
            f64::INFINITY
        };
        let edge = opp.edge();

        if allocation > 0.20 || edge < 1.0 {
            RiskLevel::Critical
        } else if allocation > 0.10 || edge < 2.0 {
            RiskLevel::High
        } else if allocation > 0.05 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Book a resolved trade. Returns the closed position, if one was open.
    pub fn record_trade_result(&mut self, ticker: &str, pnl: f64, exit_price: i64) -> Option<Position> {
        self.daily_pnl += pnl;
        self.weekly_pnl += pnl;
        self.realized_pnl += pnl;

        let closed = self.positions.remove(ticker);
        if let Some(record) = self
            .trade_history
            .iter_mut()
            .rev()
            .find(|r| r.ticker == ticker && r.exit_price.is_none())
        {
            record.exit_price = Some(exit_price);
            record.pnl = Some(pnl);
        }

        self.refresh_circuits(Instant::now());
        info!(
            "Trade result: {} pnl=${:.2} exit={}¢ (daily=${:.2})",
            ticker, pnl, exit_price, self.daily_pnl
        );
        closed
    }

    /// Mark an open position to a YES price in cents.
    pub fn update_position_price(&mut self, ticker: &str, yes_price: f64) {
        let Some(position) = self.positions.get_mut(ticker) else {
            return;
        };
        position.current_price = yes_price;
        let side_value = match position.side {
            Side::Yes => yes_price,
            Side::No => 100.0 - yes_price,
        };
        position.unrealized_pnl =
            (side_value - position.entry_price as f64) * position.size as f64 / 100.0;

        let capacity = self.config.price_history_capacity.max(2);
        let history = self.price_history.entry(ticker.to_string()).or_default();
        if history.len() >= capacity {
            history.pop_front();
        }
        history.push_back(yes_price);

        self.update_volatility_estimate();
    }

    /// Annualized stdev of one-step returns pooled across tickers.
    fn update_volatility_estimate(&mut self) {
        let returns: Vec<f64> = self
            .price_history
            .values()
            .flat_map(|prices| {
                prices
                    .iter()
                    .zip(prices.iter().skip(1))
                    .map(|(prev, next)| if *prev != 0.0 { (next - prev) / prev } else { 0.0 })
            })
            .collect();

        if returns.len() >= MIN_RETURNS_FOR_VOLATILITY {
            let n = returns.len() as f64;
            let mean = returns.iter().sum::<f64>() / n;
            let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
            self.volatility = variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
        }
    }

    pub fn reset_daily_metrics(&mut self) {
        self.daily_pnl = 0.0;
        self.intraday_drawdown = self.current_drawdown;
        self.refresh_circuits(Instant::now());
        info!("Daily risk metrics reset");
    }

    pub fn reset_weekly_metrics(&mut self) {
        self.weekly_pnl = 0.0;
        self.refresh_circuits(Instant::now());
        info!("Weekly risk metrics reset");
    }

    // ── Read-only views ───────────────────────────────────────────────

    pub fn get_risk_report(&self) -> RiskReport {
        let now = Instant::now();
        let last_day = self
            .recent_trades
            .iter()
            .filter(|t| now.duration_since(**t) < DAY)
            .count();

        let mut concentration = BTreeMap::new();
        for position in self.positions.values() {
            *concentration
                .entry(position.correlation_group.clone())
                .or_insert(0.0) += position.exposure();
        }

        RiskReport {
            circuit_breakers: self.circuits,
            daily_pnl: self.daily_pnl,
            weekly_pnl: self.weekly_pnl,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.positions.values().map(|p| p.unrealized_pnl).sum(),
            peak_equity: self.peak_equity,
            current_drawdown: self.current_drawdown,
            intraday_drawdown: self.intraday_drawdown,
            volatility_estimate: self.volatility,
            active_positions: self.positions.len(),
            active_exposure: self.positions.values().map(Position::exposure).sum(),
            concentration,
            trade_counts: TradeCounts {
                last_hour: count_since(&self.recent_trades, now, HOUR),
                last_day,
                total_history: self.trade_history.len(),
            },
            rejections: self.rejection_counts.clone(),
        }
    }

    pub fn circuits(&self) -> CircuitStates {
        self.circuits
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn trade_history(&self) -> &VecDeque<TradeRecord> {
        &self.trade_history
    }

    pub fn volatility_estimate(&self) -> f64 {
        self.volatility
    }

    pub fn last_rejection(&self) -> Option<&(String, RiskRejection)> {
        self.last_rejection.as_ref()
    }
}

/// Entries newer than `window`, located by binary search on the ordered deque.
fn count_since(times: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    match now.checked_sub(window) {
        Some(cutoff) => times.len() - times.partition_point(|t| *t <= cutoff),
        None => times.len(),
    }
}
