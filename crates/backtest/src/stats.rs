use serde::{Deserialize, Serialize};

use common::{EquityPoint, Timeframe, Trade};

/// Performance summary derived from a finished backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub net_pnl: f64,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub win_rate_pct: f64,
    /// Largest peak-to-trough equity decline, as a positive percentage.
    pub max_drawdown_pct: f64,
    /// Mean over stddev of per-bar returns, annualized by the driving
    /// bar frequency.
    pub sharpe_ratio: f64,
}

impl PerformanceStats {
    pub fn compute(
        initial_capital: f64,
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        bar_frequency: Timeframe,
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);
        let net_pnl = final_equity - initial_capital;
        let total_return_pct = if initial_capital > 0.0 {
            net_pnl / initial_capital * 100.0
        } else {
            0.0
        };

        let winners = trades.iter().filter(|t| t.pnl > 0.0).count();
        let win_rate_pct = if trades.is_empty() {
            0.0
        } else {
            winners as f64 / trades.len() as f64 * 100.0
        };

        Self {
            initial_capital,
            final_equity,
            net_pnl,
            total_return_pct,
            total_trades: trades.len(),
            win_rate_pct,
            max_drawdown_pct: max_drawdown(equity_curve),
            sharpe_ratio: sharpe(equity_curve, bar_frequency),
        }
    }
}

fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        } else if peak > 0.0 {
            let dd = (peak - point.equity) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

fn sharpe(equity_curve: &[EquityPoint], bar_frequency: Timeframe) -> f64 {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].equity > 0.0)
        .map(|w| w[1].equity / w[0].equity - 1.0)
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / (returns.len() - 1) as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        return 0.0;
    }
    mean / std * bar_frequency.periods_per_year().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use common::Direction;

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: Utc.timestamp_opt(i as i64 * 300, 0).unwrap(),
                equity,
            })
            .collect()
    }

    fn trade(pnl: f64) -> Trade {
        Trade {
            symbol: "RELIANCE".into(),
            direction: Direction::Long,
            entry_price: 100.0,
            entry_time: Utc.timestamp_opt(0, 0).unwrap(),
            exit_price: 100.0 + pnl,
            exit_time: Utc.timestamp_opt(300, 0).unwrap(),
            size: 1.0,
            pnl,
            pnl_pct: pnl,
            reasons: Vec::new(),
        }
    }

    #[test]
    fn drawdown_is_peak_to_trough() {
        // Peak 120, trough 90: drawdown 25%.
        let stats = PerformanceStats::compute(
            100.0,
            &curve(&[100.0, 120.0, 90.0, 110.0]),
            &[],
            Timeframe::M5,
        );
        assert_relative_eq!(stats.max_drawdown_pct, 25.0, epsilon = 1e-9);
    }

    #[test]
    fn monotonic_curve_has_zero_drawdown() {
        let stats = PerformanceStats::compute(
            100.0,
            &curve(&[100.0, 101.0, 103.0, 110.0]),
            &[],
            Timeframe::M5,
        );
        assert_eq!(stats.max_drawdown_pct, 0.0);
        assert_relative_eq!(stats.total_return_pct, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn win_rate_counts_positive_pnl_only() {
        let trades = vec![trade(5.0), trade(-2.0), trade(0.0), trade(1.0)];
        let stats =
            PerformanceStats::compute(100.0, &curve(&[100.0, 104.0]), &trades, Timeframe::M5);
        assert_eq!(stats.total_trades, 4);
        assert_relative_eq!(stats.win_rate_pct, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn constant_growth_has_zero_stddev_and_zero_sharpe() {
        // Exactly equal per-bar returns (doubling is exact in binary):
        // stddev 0, so Sharpe is defined as 0 rather than a division blowup.
        let stats = PerformanceStats::compute(
            100.0,
            &curve(&[100.0, 200.0, 400.0, 800.0]),
            &[],
            Timeframe::Day,
        );
        assert_eq!(stats.sharpe_ratio, 0.0);
    }

    #[test]
    fn positive_drift_gives_positive_sharpe() {
        let stats = PerformanceStats::compute(
            100.0,
            &curve(&[100.0, 102.0, 103.0, 106.0, 108.0]),
            &[],
            Timeframe::Day,
        );
        assert!(stats.sharpe_ratio > 0.0);
    }

    #[test]
    fn empty_curve_degrades_cleanly() {
        let stats = PerformanceStats::compute(100.0, &[], &[], Timeframe::M5);
        assert_eq!(stats.final_equity, 100.0);
        assert_eq!(stats.sharpe_ratio, 0.0);
        assert_eq!(stats.max_drawdown_pct, 0.0);
    }
}
