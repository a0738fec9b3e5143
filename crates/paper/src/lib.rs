use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use common::{Direction, ExecutionUpdate, IntentKind, TradeIntent};

/// Simulated execution collaborator.
///
/// Fills intents at the latest known price with configurable slippage.
/// The backtest simulator and the paper-trading mode both answer the
/// session state machine through this desk; no real order ever leaves it.
pub struct PaperExecutor {
    /// Latest known price per symbol, updated by the driving loop.
    prices: HashMap<String, f64>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperExecutor {
    pub fn new(slippage_bps: f64) -> Self {
        info!(slippage_bps, "paper executor initialized");
        Self {
            prices: HashMap::new(),
            slippage_bps,
        }
    }

    /// Update the latest price for a symbol.
    pub fn update_price(&mut self, symbol: &str, price: f64) {
        self.prices.insert(symbol.to_string(), price);
    }

    /// Fill (or reject) one intent at the current price. Longs pay the
    /// slippage on entry and give it back on exit; shorts mirrored.
    pub fn execute(&self, intent: &TradeIntent, now: DateTime<Utc>) -> ExecutionUpdate {
        let Some(&mid) = self.prices.get(&intent.symbol) else {
            return ExecutionUpdate::Rejected {
                intent_id: intent.id.clone(),
                reason: format!("no price seen for '{}'", intent.symbol),
            };
        };

        let slip = self.slippage_bps / 10_000.0;
        // Entering buys the ask / sells the bid; flattening is the
        // opposite side of the book.
        let pays_up = match (intent.kind, intent.direction) {
            (IntentKind::Enter, Direction::Long) => true,
            (IntentKind::Enter, Direction::Short) => false,
            (IntentKind::Flatten, Direction::Long) => false,
            (IntentKind::Flatten, Direction::Short) => true,
            (_, Direction::Neutral) => false,
        };
        let fill_price = if pays_up { mid * (1.0 + slip) } else { mid * (1.0 - slip) };

        debug!(
            symbol = %intent.symbol,
            kind = ?intent.kind,
            direction = %intent.direction,
            mid,
            fill = fill_price,
            "paper fill simulated"
        );

        match intent.kind {
            IntentKind::Enter => ExecutionUpdate::EntryFilled {
                intent_id: intent.id.clone(),
                symbol: intent.symbol.clone(),
                fill_price,
                fill_time: now,
            },
            IntentKind::Flatten => ExecutionUpdate::ExitFilled {
                intent_id: intent.id.clone(),
                symbol: intent.symbol.clone(),
                fill_price,
                fill_time: now,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 12, 5, 0, 0).unwrap()
    }

    #[test]
    fn long_entry_pays_positive_slippage() {
        let mut desk = PaperExecutor::new(10.0); // 10 bps
        desk.update_price("RELIANCE", 1000.0);

        let intent = TradeIntent::enter("RELIANCE", Direction::Long, 10.0, "test");
        let update = desk.execute(&intent, now());
        match update {
            ExecutionUpdate::EntryFilled { fill_price, .. } => {
                let expected = 1000.0 * (1.0 + 10.0 / 10_000.0);
                assert!((fill_price - expected).abs() < 1e-9, "got {fill_price}");
            }
            other => panic!("expected entry fill, got {other:?}"),
        }
    }

    #[test]
    fn short_entry_receives_negative_slippage() {
        let mut desk = PaperExecutor::new(10.0);
        desk.update_price("TCS", 4000.0);

        let intent = TradeIntent::enter("TCS", Direction::Short, 5.0, "test");
        match desk.execute(&intent, now()) {
            ExecutionUpdate::EntryFilled { fill_price, .. } => {
                let expected = 4000.0 * (1.0 - 10.0 / 10_000.0);
                assert!((fill_price - expected).abs() < 1e-9);
            }
            other => panic!("expected entry fill, got {other:?}"),
        }
    }

    #[test]
    fn long_flatten_sells_the_bid() {
        let mut desk = PaperExecutor::new(10.0);
        desk.update_price("RELIANCE", 1000.0);

        let intent = TradeIntent::flatten("RELIANCE", Direction::Long, 10.0, "exit");
        match desk.execute(&intent, now()) {
            ExecutionUpdate::ExitFilled { fill_price, .. } => {
                let expected = 1000.0 * (1.0 - 10.0 / 10_000.0);
                assert!((fill_price - expected).abs() < 1e-9);
            }
            other => panic!("expected exit fill, got {other:?}"),
        }
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        let desk = PaperExecutor::new(0.0);
        let intent = TradeIntent::enter("UNKNOWN", Direction::Long, 1.0, "test");
        assert!(matches!(
            desk.execute(&intent, now()),
            ExecutionUpdate::Rejected { .. }
        ));
    }
}
