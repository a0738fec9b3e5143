use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use common::{Bar, Error, Result, Timeframe};

#[derive(Debug, Deserialize)]
struct BarRecord {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl From<BarRecord> for Bar {
    fn from(r: BarRecord) -> Self {
        Bar {
            timestamp: r.timestamp,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
        }
    }
}

/// Load one CSV of bars with a `timestamp,open,high,low,close,volume`
/// header. Timestamps are RFC 3339 and must be ascending.
pub fn load_bar_file(path: &Path) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::Data(format!("cannot open '{}': {e}", path.display())))?;

    let mut bars: Vec<Bar> = Vec::new();
    for record in reader.deserialize() {
        let record: BarRecord =
            record.map_err(|e| Error::Data(format!("bad row in '{}': {e}", path.display())))?;
        if let Some(last) = bars.last() {
            if record.timestamp <= last.timestamp {
                return Err(Error::Data(format!(
                    "'{}' is not sorted: {} after {}",
                    path.display(),
                    record.timestamp,
                    last.timestamp
                )));
            }
        }
        bars.push(record.into());
    }
    Ok(bars)
}

/// Load every `SYMBOL_TIMEFRAME.csv` in a directory into per-series bar
/// lists. Files whose stem does not parse are skipped with a warning.
pub fn load_bar_directory(dir: &Path) -> Result<BTreeMap<(String, Timeframe), Vec<Bar>>> {
    let mut series = BTreeMap::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Data(format!("cannot read '{}': {e}", dir.display())))?;

    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    paths.sort();

    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((symbol, tf_str)) = stem.rsplit_once('_') else {
            warn!(file = %path.display(), "no SYMBOL_TIMEFRAME stem — skipping");
            continue;
        };
        let Ok(timeframe) = tf_str.parse::<Timeframe>() else {
            warn!(file = %path.display(), "unknown timeframe '{tf_str}' — skipping");
            continue;
        };
        let bars = load_bar_file(&path)?;
        info!(symbol, %timeframe, bars = bars.len(), "bar file loaded");
        series.insert((symbol.to_string(), timeframe), bars);
    }

    if series.is_empty() {
        return Err(Error::Data(format!(
            "no bar files found in '{}'",
            dir.display()
        )));
    }
    Ok(series)
}
