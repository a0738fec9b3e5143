use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use common::{
    Bar, Candidate, Error, ExecutionUpdate, MarketFeed, Result, Timeframe, Trade, TradeIntent,
};
use confluence::ScreenResult;
use marketdata::BarStore;

use crate::pipeline::DecisionPipeline;
use crate::state::{CycleInput, SessionState, SessionStateMachine};

/// Commands accepted by a running live session.
#[derive(Debug, Clone, Copy)]
pub enum SessionCommand {
    /// Flatten any open position and close the session. Honored between
    /// cycles, never mid-cycle.
    Abort,
}

/// Drives the shared decision pipeline against a `MarketFeed` on a fixed
/// cycle. Data refresh fans out across (symbol, timeframe) pairs; the
/// decision pass itself is strictly sequential, which is what keeps the
/// single-position invariant enforceable.
pub struct LiveSession {
    feed: Arc<dyn MarketFeed>,
    pipeline: DecisionPipeline,
    machine: SessionStateMachine,
    store: BarStore,
    cycle_interval: Duration,
    equity: f64,
    intent_tx: mpsc::Sender<TradeIntent>,
    update_rx: mpsc::Receiver<ExecutionUpdate>,
    command_rx: mpsc::Receiver<SessionCommand>,
    premarket: Option<ScreenResult>,
    screened_day: Option<NaiveDate>,
    trades: Vec<Trade>,
}

impl LiveSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: Arc<dyn MarketFeed>,
        pipeline: DecisionPipeline,
        machine: SessionStateMachine,
        cycle_interval: Duration,
        initial_equity: f64,
        intent_tx: mpsc::Sender<TradeIntent>,
        update_rx: mpsc::Receiver<ExecutionUpdate>,
        command_rx: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        Self {
            feed,
            pipeline,
            machine,
            store: BarStore::new(),
            cycle_interval,
            equity: initial_equity,
            intent_tx,
            update_rx,
            command_rx,
            premarket: None,
            screened_day: None,
            trades: Vec::new(),
        }
    }

    /// Run until the session closes for the day or an abort arrives.
    /// Returns the day's trade log for the reporting collaborator.
    pub async fn run(mut self) -> Result<Vec<Trade>> {
        info!(interval = ?self.cycle_interval, "live session running");
        let mut ticker = tokio::time::interval(self.cycle_interval);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Abort) => info!("abort command received"),
                        None => warn!("command channel closed — aborting session"),
                    }
                    self.shutdown().await?;
                    return Ok(self.trades);
                }
                _ = ticker.tick() => {
                    match self.cycle().await {
                        Ok(()) => {}
                        Err(err @ Error::StateInvariantViolation(_)) => {
                            error!(error = %err, "invariant violation — aborting session");
                            self.shutdown().await?;
                            return Err(err);
                        }
                        Err(err) => warn!(error = %err, "cycle degraded"),
                    }
                    if self.machine.state() == SessionState::Closed {
                        info!(trades = self.trades.len(), "session closed for the day");
                        return Ok(self.trades);
                    }
                }
            }
        }
    }

    async fn cycle(&mut self) -> Result<()> {
        self.drain_updates()?;
        self.refresh().await;

        let now = Utc::now();
        let day = now.date_naive();
        if self.machine.day() != Some(day) {
            self.machine.reset_for_day(day)?;
            self.premarket = None;
            self.screened_day = None;
        }

        let signals = self.pipeline.signals_at(&self.store, now)?;
        let fresh: Vec<_> = signals.values().cloned().collect();

        if self.screened_day != Some(day) {
            match self.pipeline.screener().pre_market(&fresh) {
                Ok(result) => {
                    info!(
                        long = result.long.len(),
                        short = result.short.len(),
                        "pre-market candidates selected"
                    );
                    self.premarket = Some(result);
                    self.screened_day = Some(day);
                }
                Err(Error::EmptyUniverse) => {
                    // Nothing actionable yet; try again next cycle.
                    return Ok(());
                }
                Err(other) => return Err(other),
            }
        }

        let narrowed = match &self.premarket {
            Some(premarket) => self.pipeline.screener().narrow(premarket, &fresh),
            None => return Ok(()),
        };
        let candidates: Vec<Candidate> = narrowed.candidates().cloned().collect();
        let prices = self.pipeline.latest_prices(&self.store, now);

        let intents = self.machine.on_cycle(&CycleInput {
            now,
            candidates: &candidates,
            signals: &signals,
            prices: &prices,
            equity: self.equity,
        })?;
        self.send_intents(intents).await;
        Ok(())
    }

    /// Fan out one fetch per (symbol, timeframe) pair, then materialize
    /// every result into the bar store before the decision pass runs.
    /// Fetch failures degrade the affected timeframe; they never halt the
    /// cycle.
    async fn refresh(&mut self) {
        let mut targets: Vec<(String, Timeframe)> = Vec::new();
        for symbol in self.pipeline.universe().iter().chain(self.pipeline.indexes()) {
            for &tf in self.pipeline.timeframes() {
                targets.push((symbol.clone(), tf));
            }
        }

        let mut tasks: JoinSet<(String, Timeframe, Result<Vec<Bar>>)> = JoinSet::new();
        for (symbol, tf) in targets {
            let feed = Arc::clone(&self.feed);
            let since = self.store.last_timestamp(&symbol, tf);
            tasks.spawn(async move {
                let bars = feed.fetch_bars(&symbol, tf, since).await;
                (symbol, tf, bars)
            });
        }

        let mut fetched: BTreeMap<(String, Timeframe), Vec<Bar>> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, tf, Ok(bars))) => {
                    fetched.insert((symbol, tf), bars);
                }
                Ok((symbol, tf, Err(err))) => {
                    warn!(%symbol, timeframe = %tf, error = %err, "fetch failed — timeframe degraded");
                }
                Err(err) => warn!(error = %err, "fetch task panicked"),
            }
        }

        // Deterministic append order regardless of task completion order.
        for ((symbol, tf), bars) in fetched {
            if let Err(err) = self.store.append_all(&symbol, tf, &bars) {
                warn!(%symbol, timeframe = %tf, error = %err, "ingestion halted for series");
            }
        }
    }

    fn drain_updates(&mut self) -> Result<()> {
        while let Ok(update) = self.update_rx.try_recv() {
            if let Some(trade) = self.machine.on_execution(update)? {
                self.equity += trade.pnl;
                self.trades.push(trade);
            }
        }
        Ok(())
    }

    async fn send_intents(&self, intents: Vec<TradeIntent>) {
        for intent in intents {
            if self.intent_tx.send(intent).await.is_err() {
                warn!("intent channel closed — execution collaborator gone");
            }
        }
    }

    /// Flatten and close, waiting briefly for the execution collaborator
    /// to confirm the exit.
    async fn shutdown(&mut self) -> Result<()> {
        let intents = self.machine.abort(common::ExitReason::Aborted);
        self.send_intents(intents).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.machine.state() != SessionState::Closed {
            let timeout = deadline.saturating_duration_since(tokio::time::Instant::now());
            if timeout.is_zero() {
                warn!("shutdown timed out waiting for exit confirmation");
                break;
            }
            match tokio::time::timeout(timeout, self.update_rx.recv()).await {
                Ok(Some(update)) => {
                    if let Some(trade) = self.machine.on_execution(update)? {
                        self.equity += trade.pnl;
                        self.trades.push(trade);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        info!(equity = self.equity, "session shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use confluence::{IndexWeightTable, ScorerConfig};
    use marketdata::IndicatorConfig;
    use std::collections::BTreeMap as Map;

    /// Serves a fixed history in full on the first fetch and nothing after,
    /// like a vendor adapter would on a quiet market.
    struct FixedFeed {
        bars: Vec<Bar>,
    }

    #[async_trait]
    impl MarketFeed for FixedFeed {
        async fn fetch_bars(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<Bar>> {
            Ok(self
                .bars
                .iter()
                .filter(|b| since.map_or(true, |s| b.timestamp > s))
                .copied()
                .collect())
        }
    }

    fn history() -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 12, 3, 45, 0).unwrap();
        (0..60)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.3).sin();
                Bar {
                    timestamp: start + chrono::Duration::minutes(i * 5),
                    open: close - 0.1,
                    high: close + 0.4,
                    low: close - 0.4,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn pipeline() -> DecisionPipeline {
        let weights = IndexWeightTable::from_entries([(
            "NIFTY 50".to_string(),
            Map::from([("RELIANCE".to_string(), 0.35)]),
        )])
        .unwrap();
        let mut scorer_config = ScorerConfig::default();
        scorer_config.timeframe_weights.clear();
        scorer_config.timeframe_weights.insert(Timeframe::M5, 1.0);
        let indicator_config = IndicatorConfig {
            ema_fast: 10,
            ema_slow: 20,
            ..IndicatorConfig::default()
        };
        DecisionPipeline::new(indicator_config, scorer_config, weights).unwrap()
    }

    #[tokio::test]
    async fn abort_shuts_the_session_down_cleanly() {
        let (intent_tx, mut intent_rx) = mpsc::channel(16);
        let (_update_tx, update_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::channel(4);

        let mut machine = SessionStateMachine::new(crate::state::SessionConfig::default());
        machine.reset_for_day(Utc::now().date_naive()).unwrap();

        let session = LiveSession::new(
            Arc::new(FixedFeed { bars: history() }),
            pipeline(),
            machine,
            Duration::from_millis(20),
            100_000.0,
            intent_tx,
            update_rx,
            command_rx,
        );
        let handle = tokio::spawn(session.run());

        // Let a couple of cycles happen, then abort.
        tokio::time::sleep(Duration::from_millis(80)).await;
        command_tx.send(SessionCommand::Abort).await.unwrap();

        let trades = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("session did not stop")
            .expect("session task panicked")
            .expect("session errored");
        // No position was ever opened, so no trades and no stray intents.
        assert!(trades.is_empty());
        assert!(intent_rx.try_recv().is_err());
    }
}
