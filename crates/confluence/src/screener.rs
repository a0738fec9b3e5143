use std::cmp::Ordering;

use tracing::{info, warn};

use common::{Candidate, Direction, Error, Result, Signal};

/// Ranked pre-market (or narrowed intraday) candidate lists.
#[derive(Debug, Clone, Default)]
pub struct ScreenResult {
    pub long: Vec<Candidate>,
    pub short: Vec<Candidate>,
    /// Human-readable degradation notes (short side thin, etc.).
    pub notes: Vec<String>,
}

impl ScreenResult {
    pub fn is_empty(&self) -> bool {
        self.long.is_empty() && self.short.is_empty()
    }

    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.long.iter().chain(self.short.iter())
    }
}

/// Ranks the day's signals: top 4 per direction pre-market, narrowed to
/// the top 2 per direction intraday.
#[derive(Debug, Clone)]
pub struct Screener {
    pub premarket_depth: usize,
    pub intraday_depth: usize,
}

impl Default for Screener {
    fn default() -> Self {
        Self {
            premarket_depth: 4,
            intraday_depth: 2,
        }
    }
}

impl Screener {
    /// Pre-market pass over the whole universe. A direction with fewer
    /// than `premarket_depth` non-neutral signals returns a shorter list
    /// (noted), never padded with neutral picks. Fails with
    /// `EmptyUniverse` only when no non-neutral signal exists at all.
    pub fn pre_market(&self, signals: &[Signal]) -> Result<ScreenResult> {
        let long = self.rank_side(signals, Direction::Long, self.premarket_depth);
        let short = self.rank_side(signals, Direction::Short, self.premarket_depth);

        if long.is_empty() && short.is_empty() {
            return Err(Error::EmptyUniverse);
        }

        let mut notes = Vec::new();
        for (side, list) in [("long", &long), ("short", &short)] {
            if list.len() < self.premarket_depth {
                let note = format!(
                    "{side} side has only {} non-neutral signal(s); not padding",
                    list.len()
                );
                warn!("{note}");
                notes.push(note);
            }
        }

        info!(long = long.len(), short = short.len(), "pre-market screen complete");
        Ok(ScreenResult { long, short, notes })
    }

    /// Intraday narrowing: re-rank the carried candidates by their fresh
    /// signals and keep the top `intraday_depth` per direction. Carried
    /// symbols whose fresh signal went neutral (or flipped sides) drop out.
    pub fn narrow(&self, carried: &ScreenResult, fresh: &[Signal]) -> ScreenResult {
        let refreshed: Vec<Signal> = fresh
            .iter()
            .filter(|s| carried.candidates().any(|c| c.signal.symbol == s.symbol))
            .cloned()
            .collect();

        let long = self.rank_side(&refreshed, Direction::Long, self.intraday_depth);
        let short = self.rank_side(&refreshed, Direction::Short, self.intraday_depth);

        ScreenResult {
            long,
            short,
            notes: Vec::new(),
        }
    }

    fn rank_side(&self, signals: &[Signal], direction: Direction, depth: usize) -> Vec<Candidate> {
        let mut side: Vec<&Signal> = signals.iter().filter(|s| s.direction == direction).collect();
        side.sort_by(|a, b| Self::rank_order(a, b));
        side.into_iter()
            .take(depth)
            .enumerate()
            .map(|(i, signal)| Candidate {
                rank: i + 1,
                signal: signal.clone(),
            })
            .collect()
    }

    /// Score descending, then |expected move| descending, then symbol
    /// ascending. Total and deterministic.
    fn rank_order(a: &Signal, b: &Signal) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| {
                b.net_expected_move_pct
                    .abs()
                    .total_cmp(&a.net_expected_move_pct.abs())
            })
            .then_with(|| a.symbol.cmp(&b.symbol))
    }
}
