//! Configuration loader: merges env vars, .env file, and a TOML file.

use std::path::{Path, PathBuf};

use common::config::BotConfig;
use common::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    match raw.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(Error::Config(format!("{env_name} must be an integer > 0"))),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn in_unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

pub fn validate_config(config: &BotConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();
    let engine = &config.engine;
    let risk = &config.risk;
    let strategy = &config.strategy;

    if engine.target_series.is_empty() && engine.fallback_fetch_limit == 0 {
        issues.push("engine.target_series is empty and the fallback fetch is disabled".into());
    }
    if engine.series_fetch_limit == 0 {
        issues.push("engine.series_fetch_limit must be > 0".into());
    }
    if engine.fetch_attempts == 0 {
        issues.push("engine.fetch_attempts must be > 0".into());
    }
    if engine.max_concurrent_requests == 0 {
        issues.push("engine.max_concurrent_requests must be > 0".into());
    }
    if engine.pool_max_sessions == 0 {
        issues.push("engine.pool_max_sessions must be > 0".into());
    }
    if engine.top_n == 0 {
        issues.push("engine.top_n must be > 0".into());
    }
    if engine.max_parallel_analysis == 0 {
        issues.push("engine.max_parallel_analysis must be > 0".into());
    }
    if engine.cycle_interval_secs == 0 {
        issues.push("engine.cycle_interval_secs must be > 0".into());
    }
    if engine.cycle_timeout_secs == 0 {
        issues.push("engine.cycle_timeout_secs must be > 0".into());
    }
    for (name, breaker) in [
        ("scan_breaker", engine.scan_breaker),
        ("execution_breaker", engine.execution_breaker),
    ] {
        if breaker.failure_threshold == 0 {
            issues.push(format!("engine.{name}.failure_threshold must be > 0"));
        }
    }

    if risk.max_position_size_usd <= 0.0 {
        issues.push("risk.max_position_size_usd must be > 0".into());
    }
    for (name, value) in [
        ("max_portfolio_allocation", risk.max_portfolio_allocation),
        ("max_single_trade_allocation", risk.max_single_trade_allocation),
        ("max_daily_loss_pct", risk.max_daily_loss_pct),
        ("max_drawdown_limit", risk.max_drawdown_limit),
        ("max_intraday_drawdown", risk.max_intraday_drawdown),
        ("max_concentration", risk.max_concentration),
        ("min_confidence", risk.min_confidence),
        ("min_liquidity", risk.min_liquidity),
    ] {
        if !in_unit_interval(value) {
            issues.push(format!("risk.{name} must be within [0, 1]"));
        }
    }
    if risk.max_daily_loss_usd <= 0.0 {
        issues.push("risk.max_daily_loss_usd must be > 0".into());
    }
    if risk.max_weekly_loss_usd < risk.max_daily_loss_usd {
        issues.push("risk.max_weekly_loss_usd must be >= risk.max_daily_loss_usd".into());
    }
    if risk.kelly_multiplier <= 0.0 || risk.kelly_multiplier > 1.0 {
        issues.push("risk.kelly_multiplier must be within (0, 1]".into());
    }
    if risk.min_kelly_fraction < 0.0 || risk.min_kelly_fraction > risk.max_kelly_fraction {
        issues.push("risk.min_kelly_fraction must be within [0, max_kelly_fraction]".into());
    }
    if risk.max_kelly_fraction > 1.0 {
        issues.push("risk.max_kelly_fraction must be <= 1".into());
    }
    if risk.min_edge < 0.0 {
        issues.push("risk.min_edge must be >= 0".into());
    }
    if risk.max_trades_per_hour == 0 || risk.max_trades_per_day < risk.max_trades_per_hour {
        issues.push("risk trade frequency limits must satisfy 0 < per_hour <= per_day".into());
    }

    if !(strategy.enable_fundamental || strategy.enable_momentum || strategy.enable_sentiment) {
        issues.push("at least one strategy must be enabled".into());
    }
    let weights = &strategy.weights;
    if weights.fundamental < 0.0 || weights.momentum < 0.0 || weights.sentiment < 0.0 {
        issues.push("strategy.weights must be >= 0".into());
    }
    if strategy.consensus_edge_boost < 1.0 || strategy.consensus_confidence_boost < 1.0 {
        issues.push("strategy consensus boosts must be >= 1".into());
    }
    if strategy.max_concurrent_strategies == 0 {
        issues.push("strategy.max_concurrent_strategies must be > 0".into());
    }

    if config.learner.path.trim().is_empty() {
        issues.push("learner.path must not be empty".into());
    }
    if !(0.0..1.0).contains(&config.learner.learning_rate) {
        issues.push("learner.learning_rate must be within [0, 1)".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

fn read_config_file(path: &Path) -> Result<BotConfig, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Apply environment overrides on top of file values.
fn apply_env(config: &mut BotConfig, var: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
    if let Some(key) = var("KALSHI_API_KEY") {
        config.api_key = key;
    }
    if let Some(secret) = var("KALSHI_SECRET_KEY") {
        config.secret_key = secret;
    }
    if let Some(demo) = var("KALSHI_USE_DEMO") {
        config.use_demo = parse_bool(&demo);
    }
    if let Some(paper) = var("PAPER_MODE") {
        config.engine.paper_mode = parse_bool(&paper);
    }
    if let Some(raw) = var("CYCLE_INTERVAL_SECS") {
        config.engine.cycle_interval_secs = parse_positive_u64(&raw, "CYCLE_INTERVAL_SECS")?;
    }
    if let Some(raw) = var("NEWS_FEEDS") {
        config.news.feeds = parse_list(&raw);
    }
    if let Some(path) = var("LEARNER_PATH") {
        config.learner.path = path.trim().to_string();
    }
    Ok(())
}

/// Load bot configuration from environment and optional config file.
pub fn load_config() -> Result<BotConfig, Error> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let config_path = std::env::var("ENSEMBLE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = if config_path.exists() {
        read_config_file(&config_path)?
    } else {
        BotConfig::default()
    };

    apply_env(&mut config, |name| std::env::var(name).ok())?;

    if config.api_key.is_empty() {
        return Err(Error::Config(
            "KALSHI_API_KEY is required (set in .env or environment)".into(),
        ));
    }
    if config.secret_key.is_empty() {
        return Err(Error::Config(
            "KALSHI_SECRET_KEY is required (set in .env or environment)".into(),
        ));
    }

    validate_config(&config)?;
    Ok(config)
}
