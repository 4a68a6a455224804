//! Ensemble-bot: multi-strategy Kalshi prediction-market trader.
//!
//! Single-binary Tokio application that, every cycle:
//! 1. Refreshes balance and positions
//! 2. Scans the target series for tradeable markets
//! 3. Runs the fundamental, sentiment, and momentum strategies and merges their signals
//! 4. Sizes the best opportunities under the risk budget
//! 5. Places (or, in paper mode, simulates) limit orders

mod config;
mod journal;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use common::{Error, NewsSource};
use engine::{HealthStatus, TradingEngine};
use journal::{resolve_trades_dir, TradeJournal};
use kalshi_client::{KalshiAuth, KalshiRestClient};
use news_client::JsonFeedClient;
use strategy::{LearnerStore, StrategyManager};

/// Kalshi ensemble trading bot
#[derive(Parser)]
#[command(name = "ensemble-bot", about = "Multi-strategy Kalshi trading bot")]
struct Cli {
    /// Just test authentication and print balance, then exit.
    #[arg(long)]
    check_auth: bool,

    /// Simulate fills instead of routing orders, regardless of config.
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ensemble_bot=info,engine=info,strategy=info,risk=info,resilience=info,kalshi_client=info"
                    .into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    info!("Ensemble bot starting up...");

    if let Err(e) = run(cli).await {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let mut cfg = config::load_config()?;
    if cli.dry_run {
        cfg.engine.paper_mode = true;
    }

    let env_label = if cfg.use_demo { "DEMO" } else { "PRODUCTION" };
    let mode_label = if cfg.engine.paper_mode { "PAPER" } else { "LIVE" };
    info!("Environment: {} | Mode: {}", env_label, mode_label);
    info!("Series: {:?}", cfg.engine.target_series);
    info!(
        "Risk: max_position=${:.0}, kelly×{:.2}, daily_loss=${:.0}, drawdown={:.0}%",
        cfg.risk.max_position_size_usd,
        cfg.risk.kelly_multiplier,
        cfg.risk.max_daily_loss_usd,
        cfg.risk.max_drawdown_limit * 100.0
    );

    let auth = KalshiAuth::new(&cfg.api_key, &cfg.secret_key)?;
    let client = Arc::new(KalshiRestClient::new(auth, cfg.use_demo)?);
    info!("Kalshi API: {}", client.base_url());

    if cli.check_auth {
        let balance = client.get_balance().await?;
        info!("Auth OK. Balance: ${:.2}", balance as f64 / 100.0);
        return Ok(());
    }

    let news: Option<Arc<dyn NewsSource>> = if cfg.news.feeds.is_empty() {
        info!("No news feeds configured; sentiment strategy will stay quiet");
        None
    } else {
        let timeout = Duration::from_secs(cfg.news.request_timeout_secs);
        let source: Arc<dyn NewsSource> = Arc::new(JsonFeedClient::new(timeout)?);
        Some(source)
    };
    let strategies = StrategyManager::from_config(&cfg.strategy, &cfg.news, news);
    info!("Strategies enabled: {}", strategies.strategy_count());

    let learner = Arc::new(LearnerStore::load(cfg.learner.clone())?);
    info!("Learner state: {}", learner.path().display());

    let engine = TradingEngine::new(&cfg, client, strategies, learner);
    let shutdown = engine.shutdown_token();

    let mut journal = match TradeJournal::open(resolve_trades_dir()) {
        Ok(journal) => {
            info!("Trade journal: {}", journal.dir().display());
            Some(journal)
        }
        Err(e) => {
            warn!("Trade journal disabled: {}", e);
            None
        }
    };

    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing current cycle...");
            ctrl_c_token.cancel();
        }
    });

    let interval = Duration::from_secs(cfg.engine.cycle_interval_secs);
    loop {
        let report = engine.run_cycle().await;
        if report.health.status == HealthStatus::Degraded {
            warn!(
                "Engine degraded: scan={:?} execution={:?} risk={:?}",
                report.health.scan_breaker,
                report.health.execution_breaker,
                report.health.risk_circuits.first_tripped()
            );
        }
        if let Some(journal) = journal.as_mut() {
            journal.record_cycle(&report, cfg.engine.paper_mode);
        }

        if cli.once || shutdown.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    let summary = engine.performance_report();
    info!(
        "Session summary: trades={} win_rate={:.1}% pnl=${:.2} orders={} simulated={} rejected={} failed={}",
        summary.trades.total_trades,
        summary.win_rate * 100.0,
        summary.trades.total_pnl,
        summary.execution.placed,
        summary.execution.simulated,
        summary.execution.rejected,
        summary.execution.failed
    );
    match serde_json::to_string(&summary) {
        Ok(json) => info!("Performance report: {}", json),
        Err(e) => warn!("Could not serialize performance report: {}", e),
    }
    info!("Ensemble bot stopped.");
    Ok(())
}
