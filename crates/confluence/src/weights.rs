use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::info;

use common::{Direction, Error, ExpectedMove, Result};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Deserialize)]
struct WeightFile {
    #[serde(rename = "index")]
    indexes: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    name: String,
    constituents: BTreeMap<String, f64>,
}

/// Static per-day mapping from parent index to constituent weights.
/// Loaded once before the session; read-only afterwards.
///
/// ```toml
/// [[index]]
/// name = "NIFTY 50"
/// [index.constituents]
/// RELIANCE = 0.35
/// HDFCBANK = 0.28
/// ```
#[derive(Debug, Clone, Default)]
pub struct IndexWeightTable {
    indexes: BTreeMap<String, BTreeMap<String, f64>>,
}

impl IndexWeightTable {
    /// Load and validate the daily snapshot from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read weight table '{path}': {e}")))?;
        let file: WeightFile = toml::from_str(&content)?;
        let table = Self::from_entries(
            file.indexes
                .into_iter()
                .map(|e| (e.name, e.constituents)),
        )?;
        info!(
            indexes = table.indexes.len(),
            symbols = table.symbols().len(),
            "index weight table loaded"
        );
        Ok(table)
    }

    /// Build from in-memory rows, validating every weight.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, BTreeMap<String, f64>)>,
    {
        let mut indexes = BTreeMap::new();
        for (name, constituents) in entries {
            let mut sum = 0.0;
            for (symbol, &weight) in &constituents {
                if !(weight > 0.0 && weight <= 1.0) {
                    return Err(Error::InvalidWeight {
                        index: name.clone(),
                        symbol: symbol.clone(),
                        weight,
                    });
                }
                sum += weight;
            }
            if sum > 1.0 + WEIGHT_SUM_TOLERANCE {
                return Err(Error::InvalidWeight {
                    index: name.clone(),
                    symbol: "<sum>".to_string(),
                    weight: sum,
                });
            }
            indexes.insert(name, constituents);
        }
        Ok(Self { indexes })
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    /// Every constituent symbol across all indexes, deduplicated and sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut set: Vec<String> = self
            .indexes
            .values()
            .flat_map(|row| row.keys().cloned())
            .collect();
        set.sort();
        set.dedup();
        set
    }

    /// Project an index's observed percentage move onto each constituent:
    /// `magnitude_pct = |index_move_pct| × weight`, direction from the
    /// move's sign. One `ExpectedMove` per (symbol, source_index) pair;
    /// aggregation across source indexes is the scorer's job.
    pub fn propagate(&self, index: &str, index_move_pct: f64) -> Result<Vec<ExpectedMove>> {
        let row = self
            .indexes
            .get(index)
            .ok_or_else(|| Error::Config(format!("unknown index '{index}' in weight table")))?;

        let direction = Direction::from_move(index_move_pct);
        let mut moves = Vec::with_capacity(row.len());
        for (symbol, &weight) in row {
            if !(weight > 0.0 && weight <= 1.0) {
                return Err(Error::InvalidWeight {
                    index: index.to_string(),
                    symbol: symbol.clone(),
                    weight,
                });
            }
            moves.push(ExpectedMove {
                symbol: symbol.clone(),
                source_index: index.to_string(),
                magnitude_pct: index_move_pct.abs() * weight,
                direction,
            });
        }
        Ok(moves)
    }
}
