use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use common::Timeframe;

/// Scorer parameters loaded from the `[scorer]` section of the strategy
/// TOML file.
///
/// ```toml
/// [scorer]
/// rsi_oversold = 30.0
/// rsi_overbought = 70.0
/// ai_adjustment_limit = 0.2
///
/// [scorer.timeframe_weights]
/// "15m" = 0.10
/// "1h" = 0.20
/// "4h" = 0.30
/// "day" = 0.40
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Hard clamp on the optional AI adjustment term.
    pub ai_adjustment_limit: f64,
    /// Vote weight per timeframe. Longer timeframes carry more weight;
    /// the set of keys defines which timeframes the pipeline evaluates.
    pub timeframe_weights: BTreeMap<Timeframe, f64>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        let mut timeframe_weights = BTreeMap::new();
        timeframe_weights.insert(Timeframe::M15, 0.10);
        timeframe_weights.insert(Timeframe::H1, 0.20);
        timeframe_weights.insert(Timeframe::H4, 0.30);
        timeframe_weights.insert(Timeframe::Day, 0.40);
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            ai_adjustment_limit: 0.2,
            timeframe_weights,
        }
    }
}

impl ScorerConfig {
    /// Evaluated timeframes, finest first (enum order is finest-to-coarsest).
    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.timeframe_weights.keys().copied().collect()
    }

    /// The finest configured timeframe; drives the backtest clock.
    pub fn finest_timeframe(&self) -> Option<Timeframe> {
        self.timeframe_weights.keys().next().copied()
    }

    pub fn weight_of(&self, timeframe: Timeframe) -> f64 {
        self.timeframe_weights.get(&timeframe).copied().unwrap_or(0.0)
    }
}
