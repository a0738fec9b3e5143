use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{
    Bar, Candidate, EquityPoint, Error, ExecutionUpdate, ExitReason, IntentKind, Position,
    Result, Timeframe, Trade, TradeIntent,
};
use confluence::ScreenResult;
use paper::PaperExecutor;
use session::{CycleInput, DecisionPipeline, SessionStateMachine};

use crate::stats::PerformanceStats;

/// Backtest tuning from the `[backtest]` section of the strategy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub slippage_bps: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            slippage_bps: 0.0,
        }
    }
}

/// Everything a finished run hands to the reporting collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub stats: PerformanceStats,
}

/// Event-driven replay: walks history on the finest configured timeframe
/// and drives the same pipeline and session state machine the live loop
/// drives. At simulated time T nothing downstream can see a bar past T.
///
/// Re-running the same inputs with the same configuration reproduces the
/// trade list and equity curve bit for bit.
pub struct BacktestSimulator {
    pipeline: DecisionPipeline,
    machine: SessionStateMachine,
    config: BacktestConfig,
    bars: BTreeMap<(String, Timeframe), Vec<Bar>>,
}

impl BacktestSimulator {
    pub fn new(
        pipeline: DecisionPipeline,
        machine: SessionStateMachine,
        config: BacktestConfig,
        bars: BTreeMap<(String, Timeframe), Vec<Bar>>,
    ) -> Self {
        Self {
            pipeline,
            machine,
            config,
            bars,
        }
    }

    pub fn run(mut self) -> Result<BacktestReport> {
        let finest = self.pipeline.finest_timeframe();
        let ticks: BTreeSet<DateTime<Utc>> = self
            .bars
            .iter()
            .filter(|((_, tf), _)| *tf == finest)
            .flat_map(|(_, bars)| bars.iter().map(|b| b.timestamp))
            .collect();
        let Some(&last_tick) = ticks.iter().next_back() else {
            return Err(Error::Data(format!(
                "no bars on the driving timeframe {finest}"
            )));
        };
        info!(ticks = ticks.len(), %finest, "backtest starting");

        let mut store = marketdata::BarStore::new();
        let mut executor = PaperExecutor::new(self.config.slippage_bps);
        let mut cursors: BTreeMap<(String, Timeframe), usize> = BTreeMap::new();

        let mut cash = self.config.initial_capital;
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut premarket: Option<ScreenResult> = None;
        let mut screened_day: Option<NaiveDate> = None;

        for &now in &ticks {
            // Materialize every bar up to simulated time before deciding.
            for (key, series) in &self.bars {
                let cursor = cursors.entry(key.clone()).or_insert(0);
                while *cursor < series.len() && series[*cursor].timestamp <= now {
                    store.append(&key.0, key.1, series[*cursor])?;
                    *cursor += 1;
                }
            }

            let day = now.date_naive();
            if self.machine.day() != Some(day) {
                self.machine.reset_for_day(day)?;
                premarket = None;
                screened_day = None;
            }

            let prices = self.pipeline.latest_prices(&store, now);
            for (symbol, price) in &prices {
                executor.update_price(symbol, *price);
            }

            let signals = self.pipeline.signals_at(&store, now)?;
            let fresh: Vec<_> = signals.values().cloned().collect();

            if screened_day != Some(day) {
                match self.pipeline.screener().pre_market(&fresh) {
                    Ok(result) => {
                        debug!(
                            %day,
                            long = result.long.len(),
                            short = result.short.len(),
                            "pre-market candidates selected"
                        );
                        premarket = Some(result);
                        screened_day = Some(day);
                    }
                    Err(Error::EmptyUniverse) => {} // retry next tick
                    Err(other) => return Err(other),
                }
            }

            let candidates: Vec<Candidate> = premarket
                .as_ref()
                .map(|carried| {
                    self.pipeline
                        .screener()
                        .narrow(carried, &fresh)
                        .candidates()
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            let equity = mark_to_market(cash, self.machine.open_position(), &prices);
            let intents = self.machine.on_cycle(&CycleInput {
                now,
                candidates: &candidates,
                signals: &signals,
                prices: &prices,
                equity,
            })?;
            for intent in intents {
                let update = executor.execute(&intent, now);
                apply_fill(&mut cash, &intent, &update);
                if let Some(trade) = self.machine.on_execution(update)? {
                    trades.push(trade);
                }
            }

            // History exhausted: flatten whatever is still open so the
            // final equity is realized.
            if now == last_tick {
                for intent in self.machine.abort(ExitReason::EndOfData) {
                    let update = executor.execute(&intent, now);
                    apply_fill(&mut cash, &intent, &update);
                    if let Some(trade) = self.machine.on_execution(update)? {
                        trades.push(trade);
                    }
                }
            }

            let equity = mark_to_market(cash, self.machine.open_position(), &prices);
            equity_curve.push(EquityPoint {
                timestamp: now,
                equity,
            });
        }

        let stats = PerformanceStats::compute(
            self.config.initial_capital,
            &equity_curve,
            &trades,
            finest,
        );
        info!(
            trades = trades.len(),
            final_equity = stats.final_equity,
            "backtest finished"
        );
        Ok(BacktestReport {
            trades,
            equity_curve,
            stats,
        })
    }
}

/// Cash plus the open position's market value (short positions carry
/// their entry proceeds in cash and owe the current price).
fn mark_to_market(cash: f64, position: Option<&Position>, prices: &BTreeMap<String, f64>) -> f64 {
    match position {
        None => cash,
        Some(pos) => {
            let price = prices.get(&pos.symbol).copied().unwrap_or(pos.entry_price);
            match pos.direction {
                common::Direction::Short => cash - pos.size * price,
                _ => cash + pos.size * price,
            }
        }
    }
}

fn apply_fill(cash: &mut f64, intent: &TradeIntent, update: &ExecutionUpdate) {
    let fill_price = match update {
        ExecutionUpdate::EntryFilled { fill_price, .. }
        | ExecutionUpdate::ExitFilled { fill_price, .. } => *fill_price,
        ExecutionUpdate::Rejected { .. } => return,
    };
    let notional = intent.size * fill_price;
    let buys = match (intent.kind, intent.direction) {
        (IntentKind::Enter, common::Direction::Short) => false,
        (IntentKind::Enter, _) => true,
        (IntentKind::Flatten, common::Direction::Short) => true,
        (IntentKind::Flatten, _) => false,
    };
    if buys {
        *cash -= notional;
    } else {
        *cash += notional;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::Direction;
    use confluence::{IndexWeightTable, ScorerConfig};
    use marketdata::IndicatorConfig;
    use session::SessionConfig;
    use std::collections::BTreeMap as Map;

    /// One session day of 5-minute bars, wall-clock 09:15 to 15:20.
    fn day_ticks() -> Vec<DateTime<Utc>> {
        let start = Utc.with_ymd_and_hms(2024, 3, 12, 9, 15, 0).unwrap();
        (0..74).map(|i| start + chrono::Duration::minutes(i * 5)).collect()
    }

    /// ALPHA grinds lower in a strict sawtooth: every odd bar ticks up,
    /// which fires a MACD(3,6,3) bullish cross while the close still sits
    /// under the lagging 20-bar mean.
    fn alpha_bars() -> Vec<Bar> {
        day_ticks()
            .into_iter()
            .enumerate()
            .map(|(i, timestamp)| {
                let base = 100.0 - 0.1 * i as f64;
                let close = if i % 2 == 1 { base + 0.4 } else { base - 0.4 };
                Bar {
                    timestamp,
                    open: close + 0.05,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    /// BETA never moves: permanently neutral filler for the universe.
    fn beta_bars() -> Vec<Bar> {
        day_ticks()
            .into_iter()
            .map(|timestamp| Bar {
                timestamp,
                open: 50.0,
                high: 50.1,
                low: 49.9,
                close: 50.0,
                volume: 1_000.0,
            })
            .collect()
    }

    /// The parent index climbs 0.05% per bar all day.
    fn index_bars() -> Vec<Bar> {
        day_ticks()
            .into_iter()
            .enumerate()
            .map(|(i, timestamp)| {
                let open = 22_000.0 * (1.0 + 0.0005 * i as f64);
                let close = 22_000.0 * (1.0 + 0.0005 * (i + 1) as f64);
                Bar {
                    timestamp,
                    open,
                    high: close,
                    low: open,
                    close,
                    volume: 0.0,
                }
            })
            .collect()
    }

    fn build() -> BacktestSimulator {
        let weights = IndexWeightTable::from_entries([(
            "NIFTY 50".to_string(),
            Map::from([("ALPHA".to_string(), 0.5), ("BETA".to_string(), 0.3)]),
        )])
        .unwrap();

        // Deliberately permissive thresholds so the sawtooth pattern
        // exercises entries and exits: RSI never blocks, the bands hug
        // the 20-bar mean, and the equal trend EMAs disable the veto.
        let mut scorer_config = ScorerConfig {
            rsi_oversold: 101.0,
            rsi_overbought: 200.0,
            ..ScorerConfig::default()
        };
        scorer_config.timeframe_weights.clear();
        scorer_config.timeframe_weights.insert(Timeframe::M5, 1.0);

        let indicator_config = IndicatorConfig {
            macd_fast: 3,
            macd_slow: 6,
            macd_signal: 3,
            bb_std_dev: 1e-9,
            ema_fast: 5,
            ema_slow: 5,
            ..IndicatorConfig::default()
        };

        let session_config = SessionConfig {
            entry_threshold_pct: 0.3,
            ..SessionConfig::default()
        };

        let pipeline =
            DecisionPipeline::new(indicator_config, scorer_config, weights).unwrap();
        let machine = SessionStateMachine::new(session_config);

        let mut bars = BTreeMap::new();
        bars.insert(("ALPHA".to_string(), Timeframe::M5), alpha_bars());
        bars.insert(("BETA".to_string(), Timeframe::M5), beta_bars());
        bars.insert(("NIFTY 50".to_string(), Timeframe::M5), index_bars());

        BacktestSimulator::new(pipeline, machine, BacktestConfig::default(), bars)
    }

    #[test]
    fn replay_produces_trades_inside_the_window() {
        let report = build().run().unwrap();
        assert!(!report.trades.is_empty(), "scenario should trade");

        let window_start = chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let window_end = chrono::NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        for trade in &report.trades {
            assert_eq!(trade.symbol, "ALPHA");
            assert_eq!(trade.direction, Direction::Long);
            assert!(trade.entry_time.time() >= window_start);
            assert!(trade.entry_time.time() < window_end);
            assert!(trade.exit_time.time() <= window_end);
        }
    }

    #[test]
    fn trades_never_overlap() {
        let report = build().run().unwrap();
        for pair in report.trades.windows(2) {
            assert!(
                pair[1].entry_time >= pair[0].exit_time,
                "overlapping positions: {:?} then {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn equity_curve_has_one_point_per_tick() {
        let report = build().run().unwrap();
        assert_eq!(report.equity_curve.len(), 74);
        // All trades realized; the curve ends flat at realized cash.
        let last = report.equity_curve.last().unwrap();
        assert!((last.equity - report.stats.final_equity).abs() < 1e-9);
    }

    #[test]
    fn replay_is_deterministic() {
        let first = build().run().unwrap();
        let second = build().run().unwrap();
        assert_eq!(first.trades, second.trades);
        assert_eq!(first.equity_curve, second.equity_curve);
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn stats_reflect_the_trade_log() {
        let report = build().run().unwrap();
        assert_eq!(report.stats.total_trades, report.trades.len());
        // The sawtooth scenario loses a little on every round trip.
        assert!(report.stats.net_pnl < 0.0);
        assert_eq!(report.stats.win_rate_pct, 0.0);
        assert!(report.stats.max_drawdown_pct > 0.0);
    }

    #[test]
    fn no_driving_bars_is_a_data_error() {
        let weights = IndexWeightTable::from_entries([(
            "NIFTY 50".to_string(),
            Map::from([("ALPHA".to_string(), 0.5)]),
        )])
        .unwrap();
        let mut scorer_config = ScorerConfig::default();
        scorer_config.timeframe_weights.clear();
        scorer_config.timeframe_weights.insert(Timeframe::M5, 1.0);
        let pipeline = DecisionPipeline::new(
            IndicatorConfig::default(),
            scorer_config,
            weights,
        )
        .unwrap();
        let machine = SessionStateMachine::new(SessionConfig::default());
        let sim = BacktestSimulator::new(
            pipeline,
            machine,
            BacktestConfig::default(),
            BTreeMap::new(),
        );
        assert!(matches!(sim.run().unwrap_err(), Error::Data(_)));
    }
}
