use common::Bar;

/// ATR (Average True Range) with Wilder smoothing.
///
/// True range needs the previous close, so `period + 1` bars are the
/// minimum. Seeded with the mean of the first `period` true ranges.
#[derive(Debug, Clone)]
pub struct Atr {
    pub period: usize,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self { period }
    }

    pub fn required(&self) -> usize {
        self.period + 1
    }

    /// ATR at the last bar. Oldest first.
    pub fn compute(&self, bars: &[Bar]) -> Option<f64> {
        if bars.len() < self.required() {
            return None;
        }

        let true_ranges: Vec<f64> = bars
            .windows(2)
            .map(|w| {
                let prev_close = w[0].close;
                let bar = &w[1];
                (bar.high - bar.low)
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs())
            })
            .collect();

        let mut atr = true_ranges[..self.period].iter().sum::<f64>() / self.period as f64;
        for &tr in &true_ranges[self.period..] {
            atr = (atr * (self.period - 1) as f64 + tr) / self.period as f64;
        }
        Some(atr)
    }
}
