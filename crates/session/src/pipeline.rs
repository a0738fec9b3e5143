use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use common::{Error, ExpectedMove, Result, ScoreAdvisor, Signal, Timeframe};
use confluence::scorer::{ConfluenceScorer, SymbolInputs, TimeframeData};
use confluence::{IndexWeightTable, ScorerConfig, Screener};
use marketdata::{BarStore, IndicatorConfig, IndicatorEngine};

/// The synchronous per-cycle computation shared by the live session and
/// the backtest simulator: snapshots, expected moves, signals.
///
/// Everything reads through `bars_up_to(at)`, so at evaluation time `at`
/// no component can see a bar past it.
pub struct DecisionPipeline {
    engine: IndicatorEngine,
    scorer: ConfluenceScorer,
    screener: Screener,
    weights: IndexWeightTable,
    universe: Vec<String>,
    indexes: Vec<String>,
    timeframes: Vec<Timeframe>,
    finest: Timeframe,
    advisor: Option<Arc<dyn ScoreAdvisor>>,
}

impl DecisionPipeline {
    pub fn new(
        indicator_config: IndicatorConfig,
        scorer_config: ScorerConfig,
        weights: IndexWeightTable,
    ) -> Result<Self> {
        let timeframes = scorer_config.timeframes();
        let finest = scorer_config
            .finest_timeframe()
            .ok_or_else(|| Error::Config("scorer config lists no timeframes".to_string()))?;
        Ok(Self {
            engine: IndicatorEngine::new(indicator_config),
            scorer: ConfluenceScorer::new(scorer_config),
            screener: Screener::default(),
            universe: weights.symbols(),
            indexes: weights.index_names(),
            weights,
            timeframes,
            finest,
            advisor: None,
        })
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn ScoreAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn screener(&self) -> &Screener {
        &self.screener
    }

    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    pub fn indexes(&self) -> &[String] {
        &self.indexes
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    pub fn finest_timeframe(&self) -> Timeframe {
        self.finest
    }

    /// Intraday percentage move of each parent index: first bar of the
    /// session day through the latest close visible at `at`, on the
    /// finest timeframe. Indexes with no bars today are skipped.
    pub fn index_moves(&self, store: &BarStore, at: DateTime<Utc>) -> BTreeMap<String, f64> {
        let day = at.date_naive();
        let mut moves = BTreeMap::new();
        for index in &self.indexes {
            let Some(series) = store.series(index, self.finest) else {
                continue;
            };
            let visible = series.bars_up_to(at);
            let mut today = visible.iter().filter(|b| b.timestamp.date_naive() == day);
            let Some(first) = today.next() else {
                continue;
            };
            let last = today.last().unwrap_or(first);
            if first.open > 0.0 {
                moves.insert(
                    index.clone(),
                    (last.close - first.open) / first.open * 100.0,
                );
            }
        }
        moves
    }

    /// Expected moves per constituent, one entry per (symbol, source index).
    pub fn expected_moves(
        &self,
        store: &BarStore,
        at: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Vec<ExpectedMove>>> {
        let mut by_symbol: BTreeMap<String, Vec<ExpectedMove>> = BTreeMap::new();
        for (index, move_pct) in self.index_moves(store, at) {
            for mv in self.weights.propagate(&index, move_pct)? {
                by_symbol.entry(mv.symbol.clone()).or_default().push(mv);
            }
        }
        Ok(by_symbol)
    }

    /// One fresh signal per universe symbol, as of `at`. Timeframes whose
    /// history is too short degrade to zero-weight votes; they never fail
    /// the cycle.
    pub fn signals_at(
        &mut self,
        store: &BarStore,
        at: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Signal>> {
        let mut expected = self.expected_moves(store, at)?;
        let mut signals = BTreeMap::new();

        for symbol in self.universe.clone() {
            let mut timeframes = Vec::with_capacity(self.timeframes.len());
            for &tf in &self.timeframes {
                let bars = store.series(&symbol, tf).map(|s| s.bars_up_to(at));
                let data = match bars {
                    None | Some([]) => TimeframeData::Unavailable {
                        reason: "no bars".to_string(),
                    },
                    Some(bars) => match self.engine.snapshot_pair(&symbol, tf, bars) {
                        Ok(pair) => TimeframeData::Ready {
                            previous: pair.previous,
                            current: pair.current,
                        },
                        Err(err @ Error::InsufficientData { .. }) => {
                            TimeframeData::Unavailable {
                                reason: err.to_string(),
                            }
                        }
                        Err(other) => return Err(other),
                    },
                };
                timeframes.push((tf, data));
            }

            let ai_adjustment = self.advisor.as_ref().and_then(|a| a.adjustment(&symbol));
            let signal = self.scorer.score(&SymbolInputs {
                symbol: symbol.clone(),
                timeframes,
                expected_moves: expected.remove(&symbol).unwrap_or_default(),
                ai_adjustment,
                generated_at: at,
            });
            signals.insert(symbol, signal);
        }

        if signals.is_empty() {
            warn!("universe produced no signals this cycle");
        }
        Ok(signals)
    }

    /// Latest visible close per universe symbol on the finest timeframe.
    pub fn latest_prices(&self, store: &BarStore, at: DateTime<Utc>) -> BTreeMap<String, f64> {
        self.universe
            .iter()
            .filter_map(|symbol| {
                store
                    .close_at(symbol, self.finest, at)
                    .map(|close| (symbol.clone(), close))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::Bar;
    use std::collections::BTreeMap as Map;

    fn bar(ts: DateTime<Utc>, open: f64, close: f64) -> Bar {
        Bar {
            timestamp: ts,
            open,
            high: open.max(close) + 0.5,
            low: open.min(close) - 0.5,
            close,
            volume: 1_000.0,
        }
    }

    fn weights() -> IndexWeightTable {
        IndexWeightTable::from_entries([(
            "NIFTY 50".to_string(),
            Map::from([("RELIANCE".to_string(), 0.35)]),
        )])
        .unwrap()
    }

    fn pipeline() -> DecisionPipeline {
        let mut scorer_config = ScorerConfig::default();
        scorer_config.timeframe_weights.clear();
        scorer_config.timeframe_weights.insert(Timeframe::M5, 1.0);
        DecisionPipeline::new(IndicatorConfig::default(), scorer_config, weights()).unwrap()
    }

    #[test]
    fn index_move_is_measured_from_the_day_open() {
        let pipe = pipeline();
        let mut store = BarStore::new();
        let day_start = Utc.with_ymd_and_hms(2024, 3, 12, 3, 45, 0).unwrap();
        // Index opens at 22000 and climbs 3%.
        store
            .append("NIFTY 50", Timeframe::M5, bar(day_start, 22_000.0, 22_300.0))
            .unwrap();
        store
            .append(
                "NIFTY 50",
                Timeframe::M5,
                bar(day_start + chrono::Duration::minutes(5), 22_300.0, 22_660.0),
            )
            .unwrap();

        let moves = pipe.index_moves(&store, day_start + chrono::Duration::minutes(10));
        let pct = moves["NIFTY 50"];
        assert!((pct - 3.0).abs() < 1e-9, "got {pct}");
    }

    #[test]
    fn expected_moves_scale_by_weight() {
        let pipe = pipeline();
        let mut store = BarStore::new();
        let day_start = Utc.with_ymd_and_hms(2024, 3, 12, 3, 45, 0).unwrap();
        store
            .append("NIFTY 50", Timeframe::M5, bar(day_start, 22_000.0, 22_660.0))
            .unwrap();

        let expected = pipe.expected_moves(&store, day_start).unwrap();
        let reliance = &expected["RELIANCE"][0];
        assert!((reliance.magnitude_pct - 1.05).abs() < 1e-9);
    }

    struct FixedAdvisor(f64);

    impl common::ScoreAdvisor for FixedAdvisor {
        fn adjustment(&self, _symbol: &str) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn advisor_adjustment_reaches_the_scorer() {
        let mut pipe = pipeline().with_advisor(std::sync::Arc::new(FixedAdvisor(0.1)));
        let mut store = BarStore::new();
        let day_start = Utc.with_ymd_and_hms(2024, 3, 12, 3, 45, 0).unwrap();
        store
            .append("NIFTY 50", Timeframe::M5, bar(day_start, 22_000.0, 22_100.0))
            .unwrap();
        store
            .append("RELIANCE", Timeframe::M5, bar(day_start, 2_500.0, 2_501.0))
            .unwrap();

        let signals = pipe.signals_at(&store, day_start).unwrap();
        // All timeframes are short on history, so the indicator score is 0
        // and the clamped advisor term is the whole score.
        let signal = &signals["RELIANCE"];
        assert!((signal.score - 0.1).abs() < 1e-12);
        assert!(signal.reasons.iter().any(|r| r.contains("advisor")));
    }

    #[test]
    fn short_history_degrades_to_neutral_signal_not_error() {
        let mut pipe = pipeline();
        let mut store = BarStore::new();
        let day_start = Utc.with_ymd_and_hms(2024, 3, 12, 3, 45, 0).unwrap();
        store
            .append("NIFTY 50", Timeframe::M5, bar(day_start, 22_000.0, 22_100.0))
            .unwrap();
        // Five bars of RELIANCE: nowhere near enough for EMA 200.
        for i in 0..5 {
            store
                .append(
                    "RELIANCE",
                    Timeframe::M5,
                    bar(day_start + chrono::Duration::minutes(i * 5), 2500.0, 2501.0),
                )
                .unwrap();
        }

        let signals = pipe
            .signals_at(&store, day_start + chrono::Duration::minutes(30))
            .unwrap();
        let signal = &signals["RELIANCE"];
        assert_eq!(signal.direction, common::Direction::Neutral);
        assert!(signal.reasons.iter().any(|r| r.contains("vote dropped")));
    }
}
