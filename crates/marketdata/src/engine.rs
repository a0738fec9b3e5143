use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{Bar, Error, IndicatorSnapshot, Result, Timeframe};

use crate::indicators::{Atr, Bollinger, Ema, Macd, Rsi, VolumeRatio};

/// Indicator periods. Defaults follow the standard settings the trading
/// desk runs everywhere: RSI 14, MACD 12/26/9, Bollinger 20/2, EMA 50/200,
/// ATR 14, 20-bar volume baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std_dev: f64,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub atr_period: usize,
    pub volume_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std_dev: 2.0,
            ema_fast: 50,
            ema_slow: 200,
            atr_period: 14,
            volume_period: 20,
        }
    }
}

/// The current snapshot plus the one for the preceding bar, when history
/// allows. The scorer needs both to detect MACD crossovers.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPair {
    pub previous: Option<IndicatorSnapshot>,
    pub current: IndicatorSnapshot,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    last_ts: DateTime<Utc>,
    previous: Option<IndicatorSnapshot>,
    current: IndicatorSnapshot,
}

/// Computes `IndicatorSnapshot`s over bar series, caching per
/// (symbol, timeframe) so a snapshot is recomputed only when new bars
/// arrive for that key.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
    cache: HashMap<(String, Timeframe), CacheEntry>,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Snapshot at the last bar of `bars`, plus the previous bar's
    /// snapshot when it can be computed. Fails with `InsufficientData`
    /// when the deepest indicator window (EMA 200 by default) exceeds the
    /// available history; callers must drop that timeframe from scoring
    /// rather than treat it as zero.
    pub fn snapshot_pair(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> Result<SnapshotPair> {
        let last = bars.last().ok_or_else(|| Error::InsufficientData {
            symbol: symbol.to_string(),
            timeframe,
            required: 1,
            available: 0,
        })?;

        let key = (symbol.to_string(), timeframe);
        if let Some(entry) = self.cache.get(&key) {
            if entry.last_ts == last.timestamp {
                return Ok(SnapshotPair {
                    previous: entry.previous.clone(),
                    current: entry.current.clone(),
                });
            }
        }

        let current = self.compute(symbol, timeframe, bars)?;

        let previous = if bars.len() >= 2 {
            let prev_ts = bars[bars.len() - 2].timestamp;
            match self.cache.get(&key) {
                // The series grew by exactly one bar: the old current
                // snapshot becomes the new previous without recomputation.
                Some(entry) if entry.last_ts == prev_ts => Some(entry.current.clone()),
                _ => self.compute(symbol, timeframe, &bars[..bars.len() - 1]).ok(),
            }
        } else {
            None
        };

        self.cache.insert(
            key,
            CacheEntry {
                last_ts: last.timestamp,
                previous: previous.clone(),
                current: current.clone(),
            },
        );

        Ok(SnapshotPair { previous, current })
    }

    fn compute(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> Result<IndicatorSnapshot> {
        let cfg = &self.config;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let available = bars.len();

        let insufficient = |required: usize| Error::InsufficientData {
            symbol: symbol.to_string(),
            timeframe,
            required,
            available,
        };

        let rsi_ind = Rsi::new(cfg.rsi_period);
        let macd_ind = Macd::new(cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
        let bb_ind = Bollinger::new(cfg.bb_period, cfg.bb_std_dev);
        let ema_fast = Ema::new(cfg.ema_fast);
        let ema_slow = Ema::new(cfg.ema_slow);
        let atr_ind = Atr::new(cfg.atr_period);
        let vol_ind = VolumeRatio::new(cfg.volume_period);

        let rsi = rsi_ind.compute(&closes).ok_or_else(|| insufficient(rsi_ind.required()))?;
        let macd = macd_ind.compute(&closes).ok_or_else(|| insufficient(macd_ind.required()))?;
        let bands = bb_ind.compute(&closes).ok_or_else(|| insufficient(bb_ind.required()))?;
        let ema50 = ema_fast.compute(&closes).ok_or_else(|| insufficient(ema_fast.required()))?;
        let ema200 = ema_slow.compute(&closes).ok_or_else(|| insufficient(ema_slow.required()))?;
        let atr = atr_ind.compute(bars).ok_or_else(|| insufficient(atr_ind.required()))?;
        let volume_ratio = vol_ind.compute(bars).ok_or_else(|| insufficient(vol_ind.required()))?;

        let last = &bars[bars.len() - 1];
        Ok(IndicatorSnapshot {
            symbol: symbol.to_string(),
            timeframe,
            timestamp: last.timestamp,
            close: last.close,
            rsi,
            macd_line: macd.line,
            macd_signal: macd.signal,
            bb_upper: bands.upper,
            bb_mid: bands.mid,
            bb_lower: bands.lower,
            ema50,
            ema200,
            atr,
            volume_ratio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.7).sin() * 5.0;
                Bar {
                    timestamp: Utc.timestamp_opt(i as i64 * 300, 0).unwrap(),
                    open: close - 0.2,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1_000.0 + (i % 7) as f64 * 10.0,
                }
            })
            .collect()
    }

    fn small_config() -> IndicatorConfig {
        IndicatorConfig {
            ema_fast: 10,
            ema_slow: 20,
            ..IndicatorConfig::default()
        }
    }

    #[test]
    fn short_history_fails_with_insufficient_data() {
        let mut engine = IndicatorEngine::new(IndicatorConfig::default());
        let data = bars(50); // EMA 200 cannot be computed
        let err = engine.snapshot_pair("RELIANCE", Timeframe::H1, &data).unwrap_err();
        match err {
            Error::InsufficientData { required, available, .. } => {
                assert_eq!(required, 200);
                assert_eq!(available, 50);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_carries_the_last_bar_identity() {
        let mut engine = IndicatorEngine::new(small_config());
        let data = bars(60);
        let pair = engine.snapshot_pair("RELIANCE", Timeframe::H1, &data).unwrap();
        assert_eq!(pair.current.symbol, "RELIANCE");
        assert_eq!(pair.current.timeframe, Timeframe::H1);
        assert_eq!(pair.current.timestamp, data.last().unwrap().timestamp);
        assert_eq!(pair.current.close, data.last().unwrap().close);
    }

    #[test]
    fn previous_snapshot_matches_one_fewer_bar() {
        let mut engine = IndicatorEngine::new(small_config());
        let data = bars(60);
        let pair = engine.snapshot_pair("TCS", Timeframe::M15, &data).unwrap();
        let prev = pair.previous.expect("previous snapshot should exist");
        assert_eq!(prev.timestamp, data[data.len() - 2].timestamp);
    }

    #[test]
    fn cache_returns_identical_snapshot_for_same_bars() {
        let mut engine = IndicatorEngine::new(small_config());
        let data = bars(60);
        let a = engine.snapshot_pair("INFY", Timeframe::M5, &data).unwrap();
        let b = engine.snapshot_pair("INFY", Timeframe::M5, &data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn one_new_bar_promotes_current_to_previous() {
        let mut engine = IndicatorEngine::new(small_config());
        let data = bars(61);
        let first = engine.snapshot_pair("INFY", Timeframe::M5, &data[..60]).unwrap();
        let second = engine.snapshot_pair("INFY", Timeframe::M5, &data).unwrap();
        assert_eq!(second.previous.as_ref(), Some(&first.current));
    }
}
