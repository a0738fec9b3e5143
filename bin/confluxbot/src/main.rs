use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use backtest::{load_bar_directory, BacktestConfig, BacktestReport, BacktestSimulator};
use common::{Config, RunMode};
use confluence::{IndexWeightTable, ScorerConfig};
use marketdata::IndicatorConfig;
use paper::PaperExecutor;
use session::{
    DecisionPipeline, LiveSession, SessionCommand, SessionConfig, SessionStateMachine,
};

mod replay;

/// Top-level strategy file (TOML).
///
/// Example `config/strategy.toml`:
/// ```toml
/// [indicators]
/// rsi_period = 14
///
/// [scorer]
/// rsi_oversold = 30.0
/// [scorer.timeframe_weights]
/// "15m" = 0.10
/// "1h" = 0.20
/// "4h" = 0.30
/// "day" = 0.40
///
/// [session]
/// entry_threshold_pct = 1.0
///
/// [backtest]
/// initial_capital = 100000.0
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StrategyFile {
    indicators: IndicatorConfig,
    scorer: ScorerConfig,
    session: SessionConfig,
    backtest: BacktestConfig,
}

impl StrategyFile {
    /// Load from a TOML file. Exits process on error.
    fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read strategy config at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse strategy config at '{path}': {e}"))
    }
}

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.run_mode, "ConfluxBot starting");

    let strategy = StrategyFile::load(&cfg.strategy_config_path);
    let weights = IndexWeightTable::load(&cfg.weights_path)
        .unwrap_or_else(|e| panic!("Failed to load weight table: {e}"));

    match cfg.run_mode {
        RunMode::Backtest => run_backtest(&cfg, strategy, weights),
        RunMode::Paper => run_paper(&cfg, strategy, weights).await,
    }
}

fn run_backtest(cfg: &Config, strategy: StrategyFile, weights: IndexWeightTable) {
    let bars = load_bar_directory(Path::new(&cfg.data_dir))
        .unwrap_or_else(|e| panic!("Failed to load bar data: {e}"));

    let pipeline = DecisionPipeline::new(strategy.indicators, strategy.scorer, weights)
        .unwrap_or_else(|e| panic!("Bad pipeline configuration: {e}"));
    let machine = SessionStateMachine::new(strategy.session);
    let simulator = BacktestSimulator::new(pipeline, machine, strategy.backtest, bars);

    match simulator.run() {
        Ok(report) => print_report(&report),
        Err(e) => error!(error = %e, "backtest failed"),
    }
}

fn print_report(report: &BacktestReport) {
    let stats = &report.stats;
    info!("--- Backtest Results ---");
    info!(value = stats.initial_capital, "Initial capital");
    info!(value = stats.final_equity, "Final equity");
    info!(value = stats.net_pnl, "Net PnL");
    info!(value = stats.total_return_pct, "Total return %");
    info!(value = stats.total_trades, "Total trades");
    info!(value = stats.win_rate_pct, "Win rate %");
    info!(value = stats.max_drawdown_pct, "Max drawdown %");
    info!(value = stats.sharpe_ratio, "Sharpe ratio");
    for trade in &report.trades {
        info!(
            symbol = %trade.symbol,
            direction = %trade.direction,
            entry = trade.entry_price,
            exit = trade.exit_price,
            pnl = trade.pnl,
            reason = %trade.reasons.join("; "),
            "trade"
        );
    }
}

async fn run_paper(cfg: &Config, strategy: StrategyFile, weights: IndexWeightTable) {
    let bars = load_bar_directory(Path::new(&cfg.data_dir))
        .unwrap_or_else(|e| panic!("Failed to load bar data: {e}"));

    let pipeline = DecisionPipeline::new(strategy.indicators, strategy.scorer, weights)
        .unwrap_or_else(|e| panic!("Bad pipeline configuration: {e}"));
    let machine = SessionStateMachine::new(strategy.session);

    // ── Channels ──────────────────────────────────────────────────────────────
    let (intent_tx, mut intent_rx) = mpsc::channel(64);
    let (update_tx, update_rx) = mpsc::channel(64);
    let (command_tx, command_rx) = mpsc::channel(8);

    // ── Replay feed + paper execution desk ────────────────────────────────────
    let feed = Arc::new(replay::ReplayFeed::new(bars));
    let desk_feed = Arc::clone(&feed);
    let slippage_bps = cfg.paper_slippage_bps;
    tokio::spawn(async move {
        let mut desk = PaperExecutor::new(slippage_bps);
        while let Some(intent) = intent_rx.recv().await {
            for (symbol, price) in desk_feed.last_prices() {
                desk.update_price(&symbol, price);
            }
            let update = desk.execute(&intent, chrono::Utc::now());
            if update_tx.send(update).await.is_err() {
                break;
            }
        }
    });

    // ── Session ───────────────────────────────────────────────────────────────
    let session = LiveSession::new(
        feed,
        pipeline,
        machine,
        Duration::from_secs(cfg.cycle_interval_secs),
        strategy.backtest.initial_capital,
        intent_tx,
        update_rx,
        command_rx,
    );
    let mut handle = tokio::spawn(session.run());

    info!("Paper session started. Ctrl-C to flatten and exit.");
    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received — aborting session");
            let _ = command_tx.send(SessionCommand::Abort).await;
            handle.await
        }
        res = &mut handle => res,
    };

    match result {
        Ok(Ok(trades)) => info!(trades = trades.len(), "paper session finished"),
        Ok(Err(e)) => error!(error = %e, "paper session failed"),
        Err(e) => error!(error = %e, "paper session task panicked"),
    }
}
