use super::ema::Ema;

/// MACD (Moving Average Convergence/Divergence).
///
/// MACD line = EMA(fast) − EMA(slow); signal = EMA(macd_line, signal_period).
/// `compute` returns the line and signal values at the last bar; crossover
/// detection belongs to the caller, which compares two consecutive values.
#[derive(Debug, Clone)]
pub struct Macd {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// MACD line and signal line at one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub line: f64,
    pub signal: f64,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        Self { fast, slow, signal }
    }

    /// Minimum number of closes: the slow EMA must exist for `signal`
    /// consecutive bars before the signal line is defined.
    pub fn required(&self) -> usize {
        self.slow + self.signal - 1
    }

    /// Compute line/signal at the last close. Oldest first.
    pub fn compute(&self, closes: &[f64]) -> Option<MacdValue> {
        if closes.len() < self.required() {
            return None;
        }

        let fast = Ema::new(self.fast).series(closes)?;
        let slow = Ema::new(self.slow).series(closes)?;

        // Both series are aligned to the end of `closes`; the slow series
        // is the shorter one, so trim the fast series to match.
        let offset = fast.len() - slow.len();
        let macd_line: Vec<f64> = slow
            .iter()
            .zip(&fast[offset..])
            .map(|(s, f)| f - s)
            .collect();

        let signal_series = Ema::new(self.signal).series(&macd_line)?;

        Some(MacdValue {
            line: *macd_line.last().unwrap(),
            signal: *signal_series.last().unwrap(),
        })
    }
}
