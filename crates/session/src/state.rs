use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::{
    Candidate, Direction, Error, ExecutionUpdate, ExitReason, IntentKind, Position, Result,
    Signal, Trade, TradeIntent,
};

/// Session controls loaded from the `[session]` section of the strategy
/// TOML file. Times are exchange wall-clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Start of the entry window.
    pub window_start: NaiveTime,
    /// End of the window; every open position is flattened at or after it.
    pub window_end: NaiveTime,
    /// Minimum |net expected move| (percent) to arm an entry.
    pub entry_threshold_pct: f64,
    /// Stop distance from entry, percent.
    pub stop_loss_pct: f64,
    /// Target distance from entry, percent.
    pub take_profit_pct: f64,
    /// Fraction of equity committed per entry.
    pub capital_fraction: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            entry_threshold_pct: 1.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 5.0,
            capital_fraction: 1.0,
        }
    }
}

/// Intraday controller states. One pass per trading day:
/// `Idle → Armed → InPosition → Idle`, terminally `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Armed,
    InPosition,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Armed => write!(f, "armed"),
            SessionState::InPosition => write!(f, "in-position"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Everything one evaluation cycle hands to the machine.
#[derive(Debug)]
pub struct CycleInput<'a> {
    pub now: DateTime<Utc>,
    /// Narrowed intraday candidate list (both directions).
    pub candidates: &'a [Candidate],
    /// Fresh signals for the whole universe, by symbol.
    pub signals: &'a BTreeMap<String, Signal>,
    /// Latest close per symbol on the finest timeframe.
    pub prices: &'a BTreeMap<String, f64>,
    /// Capital available for sizing.
    pub equity: f64,
}

/// The intraday session controller, shared verbatim between live trading
/// and the backtest simulator.
///
/// The single open position lives in this machine's owned `position`
/// field; every mutation goes through its transition methods. Intents are
/// fire-and-forget: a transition completes only when the execution
/// collaborator reports back through `on_execution`.
pub struct SessionStateMachine {
    config: SessionConfig,
    state: SessionState,
    position: Option<Position>,
    /// Intent awaiting an execution answer, if any.
    pending: Option<TradeIntent>,
    pending_exit: Option<ExitReason>,
    day: Option<NaiveDate>,
    aborting: bool,
}

impl SessionStateMachine {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            position: None,
            pending: None,
            pending_exit: None,
            day: None,
            aborting: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn open_position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Start a new trading day. A position surviving the previous day
    /// means the mandatory flatten never happened — a logic defect.
    pub fn reset_for_day(&mut self, day: NaiveDate) -> Result<()> {
        if self.position.is_some() {
            return Err(Error::StateInvariantViolation(format!(
                "position still open while resetting for {day}"
            )));
        }
        info!(%day, "session reset");
        self.state = SessionState::Idle;
        self.pending = None;
        self.pending_exit = None;
        self.day = Some(day);
        self.aborting = false;
        Ok(())
    }

    pub fn day(&self) -> Option<NaiveDate> {
        self.day
    }

    /// Run one evaluation cycle. Returns the intents to forward to the
    /// execution collaborator (at most one per cycle in practice).
    pub fn on_cycle(&mut self, input: &CycleInput<'_>) -> Result<Vec<TradeIntent>> {
        let time = input.now.time();
        let in_window = time >= self.config.window_start && time < self.config.window_end;
        let after_window = time >= self.config.window_end;

        match self.state {
            SessionState::Closed => Ok(Vec::new()),

            SessionState::InPosition => self.check_exits(input, after_window),

            SessionState::Idle => {
                if after_window {
                    info!("window over with no position — closing session");
                    self.state = SessionState::Closed;
                } else if in_window && !input.candidates.is_empty() {
                    info!(candidates = input.candidates.len(), "arming");
                    self.state = SessionState::Armed;
                }
                // Entries are evaluated from the next cycle onward.
                Ok(Vec::new())
            }

            SessionState::Armed => {
                if after_window {
                    info!("window over while armed — closing session");
                    self.state = SessionState::Closed;
                    return Ok(Vec::new());
                }
                if self.pending.is_some() {
                    // Entry already in flight; reconcile before acting again.
                    return Ok(Vec::new());
                }
                self.try_enter(input)
            }
        }
    }

    /// Apply an execution collaborator answer. Entry/exit fills move the
    /// machine forward; a closed trade record is returned on exit fills.
    pub fn on_execution(&mut self, update: ExecutionUpdate) -> Result<Option<Trade>> {
        match update {
            ExecutionUpdate::EntryFilled {
                intent_id,
                symbol,
                fill_price,
                fill_time,
            } => {
                let intent = self.take_pending(&intent_id, IntentKind::Enter)?;
                if self.position.is_some() {
                    return Err(Error::StateInvariantViolation(format!(
                        "entry fill for {symbol} while a position is already open"
                    )));
                }
                let (stop_price, target_price) = self.stop_target(intent.direction, fill_price);
                info!(
                    %symbol,
                    direction = %intent.direction,
                    price = fill_price,
                    size = intent.size,
                    "position opened"
                );
                self.position = Some(Position {
                    id: intent.id,
                    symbol,
                    direction: intent.direction,
                    entry_price: fill_price,
                    entry_time: fill_time,
                    size: intent.size,
                    stop_price,
                    target_price,
                });
                self.state = SessionState::InPosition;
                Ok(None)
            }

            ExecutionUpdate::ExitFilled {
                intent_id,
                symbol,
                fill_price,
                fill_time,
            } => {
                let _intent = self.take_pending(&intent_id, IntentKind::Flatten)?;
                let position = self.position.take().ok_or_else(|| {
                    Error::StateInvariantViolation(format!(
                        "exit fill for {symbol} with no open position"
                    ))
                })?;
                let exit_reason = self.pending_exit.take().unwrap_or(ExitReason::GateBroken);

                let pnl = match position.direction {
                    Direction::Long => (fill_price - position.entry_price) * position.size,
                    Direction::Short => (position.entry_price - fill_price) * position.size,
                    Direction::Neutral => 0.0,
                };
                let notional = position.entry_price * position.size;
                let pnl_pct = if notional > 0.0 { pnl / notional * 100.0 } else { 0.0 };

                info!(%symbol, pnl, pnl_pct, reason = %exit_reason, "position closed");
                let trade = Trade {
                    symbol: position.symbol,
                    direction: position.direction,
                    entry_price: position.entry_price,
                    entry_time: position.entry_time,
                    exit_price: fill_price,
                    exit_time: fill_time,
                    size: position.size,
                    pnl,
                    pnl_pct,
                    reasons: vec![exit_reason.to_string()],
                };
                self.state = if self.aborting {
                    SessionState::Closed
                } else {
                    SessionState::Idle
                };
                Ok(Some(trade))
            }

            ExecutionUpdate::Rejected { intent_id, reason } => {
                let Some(pending) = self.pending.as_ref() else {
                    warn!(%intent_id, "reject for unknown intent — ignoring");
                    return Ok(None);
                };
                if pending.id != intent_id {
                    warn!(%intent_id, "reject does not match pending intent — ignoring");
                    return Ok(None);
                }
                let pending = self.pending.take().unwrap_or_else(|| unreachable!());
                match pending.kind {
                    IntentKind::Enter => {
                        // Rejected entry drops straight back to Idle.
                        warn!(symbol = %pending.symbol, %reason, "entry rejected — returning to idle");
                        self.state = SessionState::Idle;
                    }
                    IntentKind::Flatten => {
                        // Keep holding; the flatten is retried next cycle.
                        warn!(symbol = %pending.symbol, %reason, "flatten rejected — will retry");
                        self.pending_exit = None;
                    }
                }
                Ok(None)
            }
        }
    }

    /// End the session: flatten any open position and close. Safe to
    /// call between cycles at any point. `reason` distinguishes a live
    /// abort from the backtest running out of history.
    pub fn abort(&mut self, reason: ExitReason) -> Vec<TradeIntent> {
        self.aborting = true;
        if let Some(position) = &self.position {
            if self.pending.is_none() {
                let intent = TradeIntent::flatten(
                    position.symbol.clone(),
                    position.direction,
                    position.size,
                    reason.to_string(),
                );
                warn!(symbol = %position.symbol, %reason, "flattening open position on session end");
                self.pending = Some(intent.clone());
                self.pending_exit = Some(reason);
                return vec![intent];
            }
        } else {
            self.state = SessionState::Closed;
        }
        Vec::new()
    }

    fn check_exits(&mut self, input: &CycleInput<'_>, after_window: bool) -> Result<Vec<TradeIntent>> {
        if self.pending.is_some() {
            return Ok(Vec::new());
        }
        let Some(position) = &self.position else {
            return Err(Error::StateInvariantViolation(
                "in-position state with no position".to_string(),
            ));
        };

        let price = input.prices.get(&position.symbol).copied();
        let reason = if after_window {
            Some(ExitReason::WindowClose)
        } else if let Some(price) = price {
            let stop_hit = match position.direction {
                Direction::Long => price <= position.stop_price,
                Direction::Short => price >= position.stop_price,
                Direction::Neutral => false,
            };
            let target_hit = match position.direction {
                Direction::Long => price >= position.target_price,
                Direction::Short => price <= position.target_price,
                Direction::Neutral => false,
            };
            if stop_hit {
                Some(ExitReason::StopLoss)
            } else if target_hit {
                Some(ExitReason::TakeProfit)
            } else {
                // The gate that opened the position must still hold.
                match input.signals.get(&position.symbol) {
                    Some(signal) if signal.direction == position.direction => None,
                    _ => Some(ExitReason::GateBroken),
                }
            }
        } else {
            warn!(symbol = %position.symbol, "no price for open position this cycle");
            None
        };

        if let Some(reason) = reason {
            let intent = TradeIntent::flatten(
                position.symbol.clone(),
                position.direction,
                position.size,
                reason.to_string(),
            );
            info!(symbol = %position.symbol, %reason, "exit triggered");
            self.pending = Some(intent.clone());
            self.pending_exit = Some(reason);
            return Ok(vec![intent]);
        }
        Ok(Vec::new())
    }

    fn try_enter(&mut self, input: &CycleInput<'_>) -> Result<Vec<TradeIntent>> {
        let mut qualifying: Vec<&Candidate> = input
            .candidates
            .iter()
            .filter(|c| {
                !c.signal.direction.is_neutral()
                    && c.signal.net_expected_move_pct.abs() >= self.config.entry_threshold_pct
                    && input.prices.contains_key(&c.signal.symbol)
            })
            .collect();
        if qualifying.is_empty() {
            return Ok(Vec::new());
        }

        // Highest score wins; ties break like the screener. The rest are
        // deferred to the next cycle.
        qualifying.sort_by(|a, b| {
            b.signal
                .score
                .total_cmp(&a.signal.score)
                .then_with(|| {
                    b.signal
                        .net_expected_move_pct
                        .abs()
                        .total_cmp(&a.signal.net_expected_move_pct.abs())
                })
                .then_with(|| a.signal.symbol.cmp(&b.signal.symbol))
        });
        let chosen = qualifying[0];
        if qualifying.len() > 1 {
            debug!(deferred = qualifying.len() - 1, "multiple candidates qualified");
        }

        // The single-position invariant is enforced here, at the
        // Armed → InPosition transition, not downstream.
        if self.position.is_some() {
            return Err(Error::StateInvariantViolation(format!(
                "entry attempted for {} while a position is open",
                chosen.signal.symbol
            )));
        }

        let price = input.prices[&chosen.signal.symbol];
        let size = (input.equity * self.config.capital_fraction / price).floor();
        if size < 1.0 {
            warn!(
                symbol = %chosen.signal.symbol,
                price,
                equity = input.equity,
                "not enough capital for one share — skipping entry"
            );
            return Ok(Vec::new());
        }

        let intent = TradeIntent::enter(
            chosen.signal.symbol.clone(),
            chosen.signal.direction,
            size,
            format!(
                "score {:.2}, expected move {:+.2}%",
                chosen.signal.score, chosen.signal.net_expected_move_pct
            ),
        );
        info!(
            symbol = %chosen.signal.symbol,
            direction = %chosen.signal.direction,
            size,
            "entry intent emitted"
        );
        self.pending = Some(intent.clone());
        Ok(vec![intent])
    }

    fn take_pending(&mut self, intent_id: &str, kind: IntentKind) -> Result<TradeIntent> {
        match self.pending.take() {
            Some(intent) if intent.id == intent_id && intent.kind == kind => Ok(intent),
            Some(intent) => {
                let held = intent.id.clone();
                self.pending = Some(intent);
                Err(Error::StateInvariantViolation(format!(
                    "execution update for intent {intent_id} but {held} is pending"
                )))
            }
            None => Err(Error::StateInvariantViolation(format!(
                "execution update for intent {intent_id} with nothing pending"
            ))),
        }
    }

    fn stop_target(&self, direction: Direction, entry: f64) -> (f64, f64) {
        let sl = self.config.stop_loss_pct / 100.0;
        let tp = self.config.take_profit_pct / 100.0;
        match direction {
            Direction::Short => (entry * (1.0 + sl), entry * (1.0 - tp)),
            _ => (entry * (1.0 - sl), entry * (1.0 + tp)),
        }
    }
}
