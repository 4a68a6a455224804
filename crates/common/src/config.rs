//! Bot configuration types.

use serde::{Deserialize, Serialize};

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Kalshi API key ID.
    #[serde(default)]
    pub api_key: String,

    /// RSA private key PEM (with literal \n for newlines).
    #[serde(default)]
    pub secret_key: String,

    /// Use demo environment (true) or production (false).
    #[serde(default = "default_true")]
    pub use_demo: bool,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub news: NewsConfig,

    #[serde(default)]
    pub learner: LearnerConfig,
}

/// Trading cycle orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Series tickers scanned every cycle.
    #[serde(default = "default_target_series")]
    pub target_series: Vec<String>,
    /// Markets requested per series.
    #[serde(default = "default_series_fetch_limit")]
    pub series_fetch_limit: u32,
    /// Markets requested by the generic fallback fetch.
    #[serde(default = "default_fallback_fetch_limit")]
    pub fallback_fetch_limit: u32,
    /// Run the generic fetch when series fetches return fewer markets than this.
    #[serde(default = "default_min_markets_before_fallback")]
    pub min_markets_before_fallback: usize,
    #[serde(default = "default_series_fetch_concurrency")]
    pub series_fetch_concurrency: usize,
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    /// Backoff base for transient errors; doubled per attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff base after a 429; doubled per attempt.
    #[serde(default = "default_rate_limit_backoff_base_ms")]
    pub rate_limit_backoff_base_ms: u64,
    /// Outbound calls allowed in flight at once.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Minimum spacing between any two outbound calls.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    #[serde(default = "default_pool_max_sessions")]
    pub pool_max_sessions: usize,
    #[serde(default = "default_scan_cache_ttl")]
    pub scan_cache_ttl_secs: u64,
    #[serde(default = "default_analysis_cache_ttl")]
    pub analysis_cache_ttl_secs: u64,
    /// Highest-volume markets analyzed per cycle.
    #[serde(default = "default_max_parallel_analysis")]
    pub max_parallel_analysis: usize,
    #[serde(default = "default_max_concurrent_analysis")]
    pub max_concurrent_analysis: usize,
    /// Opportunities executed per cycle.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Hard ceiling for one cycle; in-flight work is cancelled when it elapses.
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,
    #[serde(default = "default_trade_history_capacity")]
    pub trade_history_capacity: usize,
    /// Recent fill prices kept per ticker for the price-impact heuristic.
    #[serde(default = "default_impact_history_capacity")]
    pub impact_history_capacity: usize,
    /// Record simulated fills instead of routing orders.
    #[serde(default = "default_true")]
    pub paper_mode: bool,
    #[serde(default = "default_scan_breaker")]
    pub scan_breaker: BreakerConfig,
    #[serde(default = "default_execution_breaker")]
    pub execution_breaker: BreakerConfig,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

/// Risk management thresholds. Dollar amounts are USD, fractions are of balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_position_size_usd")]
    pub max_position_size_usd: f64,
    #[serde(default = "default_max_portfolio_allocation")]
    pub max_portfolio_allocation: f64,
    #[serde(default = "default_max_single_trade_allocation")]
    pub max_single_trade_allocation: f64,

    #[serde(default = "default_max_daily_loss_usd")]
    pub max_daily_loss_usd: f64,
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,
    #[serde(default = "default_max_weekly_loss_usd")]
    pub max_weekly_loss_usd: f64,
    #[serde(default = "default_max_drawdown_limit")]
    pub max_drawdown_limit: f64,
    #[serde(default = "default_max_intraday_drawdown")]
    pub max_intraday_drawdown: f64,

    /// Fractional Kelly multiplier applied to the raw Kelly fraction.
    #[serde(default = "default_kelly_multiplier")]
    pub kelly_multiplier: f64,
    #[serde(default = "default_min_kelly_fraction")]
    pub min_kelly_fraction: f64,
    #[serde(default = "default_max_kelly_fraction")]
    pub max_kelly_fraction: f64,

    #[serde(default = "default_true")]
    pub volatility_adjustment: bool,
    /// Annualized volatility above which sizes shrink proportionally.
    #[serde(default = "default_max_volatility_threshold")]
    pub max_volatility_threshold: f64,

    /// Max share of balance exposed to one correlation group.
    #[serde(default = "default_max_concentration")]
    pub max_concentration: f64,

    #[serde(default = "default_risk_min_edge")]
    pub min_edge: f64,
    #[serde(default = "default_risk_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_risk_min_liquidity")]
    pub min_liquidity: f64,

    #[serde(default = "default_max_trades_per_hour")]
    pub max_trades_per_hour: usize,
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: usize,
    /// Minimum gap between two trades on the same ticker.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,

    #[serde(default = "default_trade_history_capacity")]
    pub trade_history_capacity: usize,
    #[serde(default = "default_price_history_capacity")]
    pub price_history_capacity: usize,
}

/// Strategy selection, weighting, and per-strategy tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_true")]
    pub enable_fundamental: bool,
    #[serde(default = "default_true")]
    pub enable_momentum: bool,
    #[serde(default = "default_true")]
    pub enable_sentiment: bool,
    /// Strategies evaluated at once for a single market.
    #[serde(default = "default_max_concurrent_strategies")]
    pub max_concurrent_strategies: usize,
    #[serde(default)]
    pub weights: StrategyWeights,
    #[serde(default = "default_consensus_edge_boost")]
    pub consensus_edge_boost: f64,
    #[serde(default = "default_consensus_confidence_boost")]
    pub consensus_confidence_boost: f64,
    #[serde(default)]
    pub fundamental: FundamentalConfig,
    #[serde(default)]
    pub momentum: MomentumConfig,
    #[serde(default)]
    pub sentiment: SentimentConfig,
}

/// Static per-strategy weights, multiplied by the adaptive learner weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyWeights {
    #[serde(default = "default_fundamental_weight")]
    pub fundamental: f64,
    #[serde(default = "default_sentiment_weight")]
    pub sentiment: f64,
    #[serde(default = "default_momentum_weight")]
    pub momentum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalConfig {
    #[serde(default = "default_fundamental_min_edge")]
    pub min_edge: f64,
    #[serde(default = "default_fundamental_min_liquidity")]
    pub min_liquidity: f64,
    /// Max YES spread as a fraction of the 100-cent range.
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: f64,
    #[serde(default = "default_confidence_boost_factor")]
    pub confidence_boost_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumConfig {
    #[serde(default = "default_lookback_periods")]
    pub lookback_periods: usize,
    #[serde(default = "default_momentum_threshold")]
    pub momentum_threshold: f64,
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: f64,
    #[serde(default = "default_momentum_min_confidence")]
    pub min_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentConfig {
    /// Minimum average keyword score per matching headline.
    #[serde(default = "default_sentiment_threshold")]
    pub sentiment_threshold: f64,
    #[serde(default = "default_sentiment_confidence")]
    pub confidence: f64,
    #[serde(default = "default_sentiment_liquidity")]
    pub liquidity: f64,
    #[serde(default = "default_sentiment_probability")]
    pub probability: f64,
    #[serde(default = "default_sentiment_max_edge")]
    pub max_edge: f64,
}

/// Two-tier TTL cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,
    /// Upper bound on any single remote-store call.
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
}

/// External headline feeds for the sentiment strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    /// JSON Feed URLs. Empty disables sentiment signals.
    #[serde(default = "default_news_feeds")]
    pub feeds: Vec<String>,
    #[serde(default = "default_per_feed_limit")]
    pub per_feed_limit: usize,
    /// Headlines older than this are refetched before scoring.
    #[serde(default = "default_news_refresh")]
    pub refresh_secs: u64,
    #[serde(default = "default_news_timeout")]
    pub request_timeout_secs: u64,
}

/// Adaptive weight store persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    #[serde(default = "default_learner_path")]
    pub path: String,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_target_series() -> Vec<String> {
    ["FED", "KXECON", "KXINX", "KXCRYPTO", "INX", "BTC", "ETH"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_series_fetch_limit() -> u32 {
    15
}
fn default_fallback_fetch_limit() -> u32 {
    30
}
fn default_min_markets_before_fallback() -> usize {
    10
}
fn default_series_fetch_concurrency() -> usize {
    3
}
fn default_fetch_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_rate_limit_backoff_base_ms() -> u64 {
    1000
}
fn default_max_concurrent_requests() -> usize {
    10
}
fn default_min_request_interval_ms() -> u64 {
    100
}
fn default_pool_max_sessions() -> usize {
    5
}
fn default_scan_cache_ttl() -> u64 {
    15
}
fn default_analysis_cache_ttl() -> u64 {
    30
}
fn default_max_parallel_analysis() -> usize {
    20
}
fn default_max_concurrent_analysis() -> usize {
    5
}
fn default_top_n() -> usize {
    3
}
fn default_cycle_interval() -> u64 {
    30
}
fn default_cycle_timeout() -> u64 {
    120
}
fn default_trade_history_capacity() -> usize {
    1000
}
fn default_impact_history_capacity() -> usize {
    50
}
fn default_scan_breaker() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 3,
        recovery_timeout_secs: 60,
    }
}
fn default_execution_breaker() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 5,
        recovery_timeout_secs: 30,
    }
}

fn default_max_position_size_usd() -> f64 {
    100.0
}
fn default_max_portfolio_allocation() -> f64 {
    0.25
}
fn default_max_single_trade_allocation() -> f64 {
    0.10
}
fn default_max_daily_loss_usd() -> f64 {
    30.0
}
fn default_max_daily_loss_pct() -> f64 {
    0.10
}
fn default_max_weekly_loss_usd() -> f64 {
    100.0
}
fn default_max_drawdown_limit() -> f64 {
    0.20
}
fn default_max_intraday_drawdown() -> f64 {
    0.15
}
fn default_kelly_multiplier() -> f64 {
    0.5
}
fn default_min_kelly_fraction() -> f64 {
    0.01
}
fn default_max_kelly_fraction() -> f64 {
    0.50
}
fn default_max_volatility_threshold() -> f64 {
    0.40
}
fn default_max_concentration() -> f64 {
    0.30
}
fn default_risk_min_edge() -> f64 {
    0.5
}
fn default_risk_min_confidence() -> f64 {
    0.2
}
fn default_risk_min_liquidity() -> f64 {
    0.1
}
fn default_max_trades_per_hour() -> usize {
    10
}
fn default_max_trades_per_day() -> usize {
    50
}
fn default_cooldown_minutes() -> u64 {
    5
}
fn default_price_history_capacity() -> usize {
    50
}

fn default_max_concurrent_strategies() -> usize {
    3
}
fn default_consensus_edge_boost() -> f64 {
    1.1
}
fn default_consensus_confidence_boost() -> f64 {
    1.2
}
fn default_fundamental_weight() -> f64 {
    1.0
}
fn default_sentiment_weight() -> f64 {
    0.8
}
fn default_momentum_weight() -> f64 {
    0.9
}
fn default_fundamental_min_edge() -> f64 {
    0.1
}
fn default_fundamental_min_liquidity() -> f64 {
    0.01
}
fn default_max_spread_pct() -> f64 {
    0.05
}
fn default_confidence_boost_factor() -> f64 {
    1.5
}
fn default_lookback_periods() -> usize {
    10
}
fn default_momentum_threshold() -> f64 {
    0.02
}
fn default_volume_threshold() -> f64 {
    1.5
}
fn default_momentum_min_confidence() -> f64 {
    0.4
}
fn default_sentiment_threshold() -> f64 {
    0.3
}
fn default_sentiment_confidence() -> f64 {
    0.6
}
fn default_sentiment_liquidity() -> f64 {
    0.8
}
fn default_sentiment_probability() -> f64 {
    0.7
}
fn default_sentiment_max_edge() -> f64 {
    20.0
}

fn default_cache_ttl() -> u64 {
    60
}
fn default_local_max_entries() -> usize {
    500
}
fn default_remote_timeout_ms() -> u64 {
    250
}

/// Market, finance, and crypto headlines, served as JSON through rss2json.
fn default_news_feeds() -> Vec<String> {
    [
        "https://api.rss2json.com/v1/api.json?rss_url=https%3A%2F%2Ffeeds.content.dowjones.io%2Fpublic%2Frss%2Fmw_topstories",
        "https://api.rss2json.com/v1/api.json?rss_url=https%3A%2F%2Fwww.cnbc.com%2Fid%2F19789731%2Fdevice%2Frss%2Frss.xml",
        "https://api.rss2json.com/v1/api.json?rss_url=https%3A%2F%2Fcointelegraph.com%2Frss",
    ]
    .iter()
    .map(|url| url.to_string())
    .collect()
}
fn default_per_feed_limit() -> usize {
    5
}
fn default_news_refresh() -> u64 {
    600
}
fn default_news_timeout() -> u64 {
    10
}

fn default_learner_path() -> String {
    "data/learner.json".into()
}
fn default_learning_rate() -> f64 {
    0.05
}
fn default_history_limit() -> usize {
    100
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            use_demo: true,
            engine: EngineConfig::default(),
            risk: RiskConfig::default(),
            strategy: StrategyConfig::default(),
            cache: CacheConfig::default(),
            news: NewsConfig::default(),
            learner: LearnerConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_series: default_target_series(),
            series_fetch_limit: default_series_fetch_limit(),
            fallback_fetch_limit: default_fallback_fetch_limit(),
            min_markets_before_fallback: default_min_markets_before_fallback(),
            series_fetch_concurrency: default_series_fetch_concurrency(),
            fetch_attempts: default_fetch_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            rate_limit_backoff_base_ms: default_rate_limit_backoff_base_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            min_request_interval_ms: default_min_request_interval_ms(),
            pool_max_sessions: default_pool_max_sessions(),
            scan_cache_ttl_secs: default_scan_cache_ttl(),
            analysis_cache_ttl_secs: default_analysis_cache_ttl(),
            max_parallel_analysis: default_max_parallel_analysis(),
            max_concurrent_analysis: default_max_concurrent_analysis(),
            top_n: default_top_n(),
            cycle_interval_secs: default_cycle_interval(),
            cycle_timeout_secs: default_cycle_timeout(),
            trade_history_capacity: default_trade_history_capacity(),
            impact_history_capacity: default_impact_history_capacity(),
            paper_mode: true,
            scan_breaker: default_scan_breaker(),
            execution_breaker: default_execution_breaker(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_usd: default_max_position_size_usd(),
            max_portfolio_allocation: default_max_portfolio_allocation(),
            max_single_trade_allocation: default_max_single_trade_allocation(),
            max_daily_loss_usd: default_max_daily_loss_usd(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_weekly_loss_usd: default_max_weekly_loss_usd(),
            max_drawdown_limit: default_max_drawdown_limit(),
            max_intraday_drawdown: default_max_intraday_drawdown(),
            kelly_multiplier: default_kelly_multiplier(),
            min_kelly_fraction: default_min_kelly_fraction(),
            max_kelly_fraction: default_max_kelly_fraction(),
            volatility_adjustment: true,
            max_volatility_threshold: default_max_volatility_threshold(),
            max_concentration: default_max_concentration(),
            min_edge: default_risk_min_edge(),
            min_confidence: default_risk_min_confidence(),
            min_liquidity: default_risk_min_liquidity(),
            max_trades_per_hour: default_max_trades_per_hour(),
            max_trades_per_day: default_max_trades_per_day(),
            cooldown_minutes: default_cooldown_minutes(),
            trade_history_capacity: default_trade_history_capacity(),
            price_history_capacity: default_price_history_capacity(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            enable_fundamental: true,
            enable_momentum: true,
            enable_sentiment: true,
            max_concurrent_strategies: default_max_concurrent_strategies(),
            weights: StrategyWeights::default(),
            consensus_edge_boost: default_consensus_edge_boost(),
            consensus_confidence_boost: default_consensus_confidence_boost(),
            fundamental: FundamentalConfig::default(),
            momentum: MomentumConfig::default(),
            sentiment: SentimentConfig::default(),
        }
    }
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            fundamental: default_fundamental_weight(),
            sentiment: default_sentiment_weight(),
            momentum: default_momentum_weight(),
        }
    }
}

impl Default for FundamentalConfig {
    fn default() -> Self {
        Self {
            min_edge: default_fundamental_min_edge(),
            min_liquidity: default_fundamental_min_liquidity(),
            max_spread_pct: default_max_spread_pct(),
            confidence_boost_factor: default_confidence_boost_factor(),
        }
    }
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback_periods: default_lookback_periods(),
            momentum_threshold: default_momentum_threshold(),
            volume_threshold: default_volume_threshold(),
            min_confidence: default_momentum_min_confidence(),
        }
    }
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            sentiment_threshold: default_sentiment_threshold(),
            confidence: default_sentiment_confidence(),
            liquidity: default_sentiment_liquidity(),
            probability: default_sentiment_probability(),
            max_edge: default_sentiment_max_edge(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl(),
            local_max_entries: default_local_max_entries(),
            remote_timeout_ms: default_remote_timeout_ms(),
        }
    }
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            feeds: default_news_feeds(),
            per_feed_limit: default_per_feed_limit(),
            refresh_secs: default_news_refresh(),
            request_timeout_secs: default_news_timeout(),
        }
    }
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            path: default_learner_path(),
            learning_rate: default_learning_rate(),
            history_limit: default_history_limit(),
        }
    }
}
