/// Bollinger Bands: SMA mid band ± `std_dev` sample standard deviations.
///
/// Sample (n−1) standard deviation, matching the pandas rolling default
/// most charting stacks use for these bands.
#[derive(Debug, Clone)]
pub struct Bollinger {
    pub period: usize,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub mid: f64,
    pub lower: f64,
}

impl Bollinger {
    pub fn new(period: usize, std_dev: f64) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        assert!(std_dev > 0.0, "Bollinger std_dev must be positive");
        Self { period, std_dev }
    }

    pub fn required(&self) -> usize {
        self.period
    }

    /// Bands at the last close. Oldest first.
    pub fn compute(&self, closes: &[f64]) -> Option<BollingerBands> {
        if closes.len() < self.period {
            return None;
        }
        let window = &closes[closes.len() - self.period..];
        let mid = window.iter().sum::<f64>() / self.period as f64;
        let variance =
            window.iter().map(|c| (c - mid).powi(2)).sum::<f64>() / (self.period - 1) as f64;
        let sd = variance.sqrt();

        Some(BollingerBands {
            upper: mid + sd * self.std_dev,
            mid,
            lower: mid - sd * self.std_dev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn returns_none_when_insufficient_data() {
        assert!(Bollinger::new(20, 2.0).compute(&[1.0; 19]).is_none());
    }

    #[test]
    fn flat_series_collapses_the_bands() {
        let bands = Bollinger::new(5, 2.0).compute(&[10.0; 10]).unwrap();
        assert_relative_eq!(bands.upper, 10.0, epsilon = 1e-12);
        assert_relative_eq!(bands.mid, 10.0, epsilon = 1e-12);
        assert_relative_eq!(bands.lower, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn bands_are_symmetric_around_the_mean() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        let bands = Bollinger::new(5, 2.0).compute(&closes).unwrap();
        assert_relative_eq!(bands.mid, 3.0, epsilon = 1e-12);
        assert_relative_eq!(bands.upper - bands.mid, bands.mid - bands.lower, epsilon = 1e-12);
        // Sample stddev of 1..=5 is sqrt(2.5)
        assert_relative_eq!(bands.upper, 3.0 + 2.0 * 2.5f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn only_the_trailing_window_counts() {
        let mut closes = vec![1000.0; 10];
        closes.extend([5.0, 5.0, 5.0, 5.0, 5.0]);
        let bands = Bollinger::new(5, 2.0).compute(&closes).unwrap();
        assert_relative_eq!(bands.mid, 5.0, epsilon = 1e-12);
    }
}
