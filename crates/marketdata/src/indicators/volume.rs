use common::Bar;

/// Current bar volume over the rolling average of the preceding `period`
/// bars. A ratio above 1 marks above-average participation.
#[derive(Debug, Clone)]
pub struct VolumeRatio {
    pub period: usize,
}

impl VolumeRatio {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "volume period must be >= 1");
        Self { period }
    }

    pub fn required(&self) -> usize {
        self.period + 1
    }

    /// Ratio at the last bar. Oldest first. A zero-volume baseline
    /// (halted series) yields `None` rather than a division blowup.
    pub fn compute(&self, bars: &[Bar]) -> Option<f64> {
        if bars.len() < self.required() {
            return None;
        }
        let current = bars[bars.len() - 1].volume;
        let baseline = &bars[bars.len() - 1 - self.period..bars.len() - 1];
        let avg = baseline.iter().map(|b| b.volume).sum::<f64>() / self.period as f64;
        if avg <= 0.0 {
            return None;
        }
        Some(current / avg)
    }
}
