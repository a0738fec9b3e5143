use chrono::{DateTime, Utc};
use tracing::debug;

use common::{Direction, ExpectedMove, IndicatorSnapshot, Signal, Timeframe};

use crate::config::ScorerConfig;

/// Indicator state of one timeframe going into a scoring pass.
///
/// A timeframe whose snapshot failed with `InsufficientData` arrives as
/// `Unavailable` and contributes zero weight; it never halts the cycle.
#[derive(Debug, Clone)]
pub enum TimeframeData {
    Ready {
        /// Snapshot for the preceding bar; without it no crossover can be
        /// detected and the timeframe votes 0.
        previous: Option<IndicatorSnapshot>,
        current: IndicatorSnapshot,
    },
    Unavailable {
        reason: String,
    },
}

/// Everything the scorer sees for one symbol in one evaluation cycle.
#[derive(Debug, Clone)]
pub struct SymbolInputs {
    pub symbol: String,
    pub timeframes: Vec<(Timeframe, TimeframeData)>,
    /// One entry per (symbol, source_index) pair from weight propagation.
    pub expected_moves: Vec<ExpectedMove>,
    /// Optional adjustment from the AI/heuristic collaborator. Clamped to
    /// the configured limit before use; absent means 0.
    pub ai_adjustment: Option<f64>,
    pub generated_at: DateTime<Utc>,
}

/// Combines per-timeframe indicator votes with weight-propagated expected
/// moves into exactly one `Signal` per symbol.
///
/// Pure and deterministic: identical inputs always produce an identical
/// Signal. The backtest's trustworthiness rests on that.
#[derive(Debug, Clone)]
pub struct ConfluenceScorer {
    config: ScorerConfig,
}

impl ConfluenceScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn score(&self, inputs: &SymbolInputs) -> Signal {
        let mut reasons = Vec::new();
        let mut weighted_sum = 0.0;
        let mut usable_weight = 0.0;

        for (timeframe, data) in &inputs.timeframes {
            let weight = self.config.weight_of(*timeframe);
            match data {
                TimeframeData::Unavailable { reason } => {
                    reasons.push(format!("{timeframe}: vote dropped ({reason})"));
                }
                TimeframeData::Ready { previous, current } => {
                    let vote = self.vote(*timeframe, previous.as_ref(), current, &mut reasons);
                    weighted_sum += weight * vote as f64;
                    usable_weight += weight;
                }
            }
        }

        let raw = if usable_weight > 0.0 {
            weighted_sum / usable_weight
        } else {
            0.0
        };
        let indicator_direction = Direction::from_move(raw);

        let mut net_expected_move_pct = 0.0;
        for mv in &inputs.expected_moves {
            net_expected_move_pct += mv.signed_pct();
            reasons.push(format!(
                "{}: weight-propagated move {:+.2}%",
                mv.source_index,
                mv.signed_pct()
            ));
        }
        let move_direction = Direction::from_move(net_expected_move_pct);

        let mut score = raw.abs();
        if let Some(adj) = inputs.ai_adjustment {
            let limit = self.config.ai_adjustment_limit;
            let clamped = adj.clamp(-limit, limit);
            if clamped != 0.0 {
                reasons.push(format!("advisor adjustment {clamped:+.2}"));
            }
            score += clamped;
        }
        let score = score.clamp(0.0, 1.0);

        // Confluence gate: indicator votes and the expected move must
        // agree on direction, otherwise the signal is neutral no matter
        // how large the score is.
        let direction = if !indicator_direction.is_neutral()
            && indicator_direction == move_direction
        {
            reasons.push(format!("gate: indicator {indicator_direction} agrees with expected move"));
            indicator_direction
        } else {
            reasons.push(format!(
                "gate: indicator {indicator_direction} vs expected move {move_direction} — neutral"
            ));
            Direction::Neutral
        };

        debug!(
            symbol = %inputs.symbol,
            %direction,
            score,
            net_expected_move_pct,
            "signal scored"
        );

        Signal {
            symbol: inputs.symbol.clone(),
            direction,
            score,
            net_expected_move_pct,
            reasons,
            generated_at: inputs.generated_at,
        }
    }

    /// One timeframe's directional vote in {-1, 0, +1}.
    fn vote(
        &self,
        timeframe: Timeframe,
        previous: Option<&IndicatorSnapshot>,
        current: &IndicatorSnapshot,
        reasons: &mut Vec<String>,
    ) -> i8 {
        let bullish_cross = previous.is_some_and(|p| {
            p.macd_line <= p.macd_signal && current.macd_line > current.macd_signal
        });
        let bearish_cross = previous.is_some_and(|p| {
            p.macd_line >= p.macd_signal && current.macd_line < current.macd_signal
        });

        let oversold_reversal = current.rsi < self.config.rsi_oversold
            && current.close < current.bb_lower
            && bullish_cross;
        let overbought_reversal = current.rsi > self.config.rsi_overbought
            && current.close > current.bb_upper
            && bearish_cross;

        let uptrend = current.ema50 >= current.ema200;

        if oversold_reversal {
            if !uptrend {
                reasons.push(format!(
                    "{timeframe}: long vote vetoed by downtrend (ema50 < ema200)"
                ));
                return 0;
            }
            reasons.push(format!(
                "{timeframe}: oversold reversal +1 (rsi {:.1}, close below lower band, macd bullish cross)",
                current.rsi
            ));
            1
        } else if overbought_reversal {
            if uptrend {
                reasons.push(format!(
                    "{timeframe}: short vote vetoed by uptrend (ema50 >= ema200)"
                ));
                return 0;
            }
            reasons.push(format!(
                "{timeframe}: overbought reversal -1 (rsi {:.1}, close above upper band, macd bearish cross)",
                current.rsi
            ));
            -1
        } else {
            reasons.push(format!("{timeframe}: no vote"));
            0
        }
    }
}
