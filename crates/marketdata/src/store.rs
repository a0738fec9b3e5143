use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use common::{Bar, Error, Result, Timeframe};

/// Append-only ordered bar sequence for one (symbol, timeframe).
///
/// The indicator engine reads suffix windows; nothing ever mutates stored
/// bars. Appends must arrive in strictly increasing timestamp order —
/// duplicates and regressions are a feed collaborator defect and are
/// rejected with `OutOfOrderBar`.
#[derive(Debug, Clone, Default)]
pub struct TimeframeSeries {
    bars: Vec<Bar>,
}

impl TimeframeSeries {
    pub fn new() -> Self {
        Self { bars: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }

    /// All bars with timestamp ≤ `at`. This is the only view the backtest
    /// simulator exposes to downstream components, so nothing can look
    /// ahead of simulated time.
    pub fn bars_up_to(&self, at: DateTime<Utc>) -> &[Bar] {
        let end = self.bars.partition_point(|b| b.timestamp <= at);
        &self.bars[..end]
    }

    fn append(&mut self, symbol: &str, timeframe: Timeframe, bar: Bar) -> Result<()> {
        if let Some(last) = self.bars.last() {
            if bar.timestamp <= last.timestamp {
                return Err(Error::OutOfOrderBar {
                    symbol: symbol.to_string(),
                    timeframe,
                    last: last.timestamp,
                    attempted: bar.timestamp,
                });
            }
        }
        self.bars.push(bar);
        Ok(())
    }
}

/// Normalized OHLCV storage for the whole universe, keyed by
/// (symbol, timeframe). `BTreeMap` keeps iteration deterministic, which
/// the backtest reproducibility guarantee leans on.
#[derive(Debug, Clone, Default)]
pub struct BarStore {
    series: BTreeMap<(String, Timeframe), TimeframeSeries>,
}

impl BarStore {
    pub fn new() -> Self {
        Self {
            series: BTreeMap::new(),
        }
    }

    /// Append one bar. Timestamps must be strictly increasing per series;
    /// a violation halts ingestion for that series only.
    pub fn append(&mut self, symbol: &str, timeframe: Timeframe, bar: Bar) -> Result<()> {
        self.series
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .append(symbol, timeframe, bar)
    }

    /// Append a batch in order, stopping at the first rejected bar.
    pub fn append_all(&mut self, symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Result<()> {
        for bar in bars {
            self.append(symbol, timeframe, *bar)?;
        }
        debug!(symbol, %timeframe, count = bars.len(), "bars appended");
        Ok(())
    }

    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> Option<&TimeframeSeries> {
        self.series.get(&(symbol.to_string(), timeframe))
    }

    /// Latest stored timestamp for a series, for incremental feed fetches.
    pub fn last_timestamp(&self, symbol: &str, timeframe: Timeframe) -> Option<DateTime<Utc>> {
        self.series(symbol, timeframe).and_then(|s| s.last_timestamp())
    }

    /// Last close at or before `at` on the given timeframe.
    pub fn close_at(&self, symbol: &str, timeframe: Timeframe, at: DateTime<Utc>) -> Option<f64> {
        self.series(symbol, timeframe)
            .and_then(|s| s.bars_up_to(at).last())
            .map(|b| b.close)
    }

    pub fn keys(&self) -> impl Iterator<Item = &(String, Timeframe)> {
        self.series.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(ts_min: i64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(ts_min * 60, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn append_accepts_increasing_timestamps() {
        let mut store = BarStore::new();
        store.append("RELIANCE", Timeframe::M5, bar(0, 100.0)).unwrap();
        store.append("RELIANCE", Timeframe::M5, bar(5, 101.0)).unwrap();
        assert_eq!(store.series("RELIANCE", Timeframe::M5).unwrap().len(), 2);
    }

    #[test]
    fn append_rejects_duplicate_timestamp() {
        let mut store = BarStore::new();
        store.append("TCS", Timeframe::M5, bar(0, 100.0)).unwrap();
        let err = store.append("TCS", Timeframe::M5, bar(0, 100.5)).unwrap_err();
        assert!(matches!(err, Error::OutOfOrderBar { .. }), "got: {err:?}");
    }

    #[test]
    fn append_rejects_regressing_timestamp() {
        let mut store = BarStore::new();
        store.append("TCS", Timeframe::M5, bar(10, 100.0)).unwrap();
        let err = store.append("TCS", Timeframe::M5, bar(5, 99.0)).unwrap_err();
        assert!(matches!(err, Error::OutOfOrderBar { .. }));
    }

    #[test]
    fn rejection_halts_only_the_affected_series() {
        let mut store = BarStore::new();
        store.append("TCS", Timeframe::M5, bar(10, 100.0)).unwrap();
        let _ = store.append("TCS", Timeframe::M5, bar(5, 99.0));
        // Other series keep accepting bars.
        store.append("TCS", Timeframe::M15, bar(5, 99.0)).unwrap();
        store.append("INFY", Timeframe::M5, bar(5, 50.0)).unwrap();
        // The affected series still accepts correctly ordered bars.
        store.append("TCS", Timeframe::M5, bar(15, 101.0)).unwrap();
    }

    #[test]
    fn bars_up_to_hides_the_future() {
        let mut store = BarStore::new();
        for i in 0..10 {
            store.append("INFY", Timeframe::M5, bar(i * 5, 100.0 + i as f64)).unwrap();
        }
        let series = store.series("INFY", Timeframe::M5).unwrap();
        let cutoff = Utc.timestamp_opt(4 * 5 * 60, 0).unwrap();
        let visible = series.bars_up_to(cutoff);
        assert_eq!(visible.len(), 5);
        assert!(visible.iter().all(|b| b.timestamp <= cutoff));
    }
}
