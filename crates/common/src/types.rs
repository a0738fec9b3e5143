use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bar timeframes supported by the decision pipeline.
///
/// `periods_per_year` is derived from the NSE cash session (375 minutes,
/// 252 trading days) and feeds the Sharpe annualization factor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
}

/// Minutes in one NSE cash session.
pub const SESSION_MINUTES: f64 = 375.0;
/// NSE trading days per year.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

impl Timeframe {
    /// Bar length in minutes. Daily and longer bars report their nominal
    /// intraday-equivalent length only through `periods_per_year`.
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::Day => 375,
            Timeframe::Week => 1_875,
            Timeframe::Month => 7_875,
        }
    }

    /// Number of bars of this timeframe in one year, for annualization.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            Timeframe::Day => TRADING_DAYS_PER_YEAR,
            Timeframe::Week => 52.0,
            Timeframe::Month => 12.0,
            intraday => TRADING_DAYS_PER_YEAR * (SESSION_MINUTES / intraday.minutes() as f64),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::Day => "day",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "2h" => Ok(Timeframe::H2),
            "4h" => Ok(Timeframe::H4),
            "day" => Ok(Timeframe::Day),
            "week" => Ok(Timeframe::Week),
            "month" => Ok(Timeframe::Month),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

/// One OHLCV bar for a symbol at a timeframe. Immutable once stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Direction of a signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    #[default]
    Neutral,
}

impl Direction {
    /// Direction of a percentage move. Zero maps to `Neutral`.
    pub fn from_move(pct: f64) -> Self {
        if pct > 0.0 {
            Direction::Long
        } else if pct < 0.0 {
            Direction::Short
        } else {
            Direction::Neutral
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Neutral => Direction::Neutral,
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Direction::Neutral)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
            Direction::Neutral => write!(f, "neutral"),
        }
    }
}

/// Computed indicator values for one (symbol, timeframe, timestamp).
/// Derived and cached; recomputed only when new bars arrive for that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    /// Close of the bar the snapshot is tied to, so scoring never reaches
    /// back into the bar store.
    pub close: f64,
    pub rsi: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub bb_upper: f64,
    pub bb_mid: f64,
    pub bb_lower: f64,
    pub ema50: f64,
    pub ema200: f64,
    pub atr: f64,
    pub volume_ratio: f64,
}

/// Projected constituent move derived from a parent index move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedMove {
    pub symbol: String,
    pub source_index: String,
    /// Always non-negative; `direction` carries the sign.
    pub magnitude_pct: f64,
    pub direction: Direction,
}

impl ExpectedMove {
    /// Magnitude signed by direction, for aggregation across source indexes.
    pub fn signed_pct(&self) -> f64 {
        match self.direction {
            Direction::Long => self.magnitude_pct,
            Direction::Short => -self.magnitude_pct,
            Direction::Neutral => 0.0,
        }
    }
}

/// Directional score for one symbol, produced once per evaluation cycle.
/// Immutable; the next cycle supersedes it with a fresh Signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// Confluence score in [0, 1].
    pub score: f64,
    /// Net expected move across all source indexes, signed (percent).
    pub net_expected_move_pct: f64,
    /// Every vote, veto, and weight-table entry that fired, in order.
    pub reasons: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    pub fn neutral(symbol: impl Into<String>, generated_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            direction: Direction::Neutral,
            score: 0.0,
            net_expected_move_pct: 0.0,
            reasons: Vec::new(),
            generated_at,
        }
    }
}

/// A Signal promoted by the screener, with its rank within its direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub rank: usize,
    pub signal: Signal,
}

/// An open position. At most one position is open system-wide at any
/// instant; creation and closure are routed exclusively through the
/// session state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub size: f64,
    pub stop_price: f64,
    pub target_price: f64,
}

/// A closed position record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub size: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub reasons: Vec<String>,
}

/// Why a position was (or is being) flattened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    GateBroken,
    StopLoss,
    TakeProfit,
    WindowClose,
    Aborted,
    EndOfData,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::GateBroken => write!(f, "confluence gate broken"),
            ExitReason::StopLoss => write!(f, "stop-loss hit"),
            ExitReason::TakeProfit => write!(f, "take-profit hit"),
            ExitReason::WindowClose => write!(f, "session window close"),
            ExitReason::Aborted => write!(f, "session aborted"),
            ExitReason::EndOfData => write!(f, "end of data"),
        }
    }
}

/// What an emitted intent asks the execution collaborator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Enter,
    Flatten,
}

/// Order intent emitted by the session state machine. Emission is
/// fire-and-forget; the machine reconciles only via `ExecutionUpdate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub size: f64,
    pub kind: IntentKind,
    pub reason: String,
}

impl TradeIntent {
    pub fn enter(
        symbol: impl Into<String>,
        direction: Direction,
        size: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            direction,
            size,
            kind: IntentKind::Enter,
            reason: reason.into(),
        }
    }

    pub fn flatten(
        symbol: impl Into<String>,
        direction: Direction,
        size: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            direction,
            size,
            kind: IntentKind::Flatten,
            reason: reason.into(),
        }
    }
}

/// Fill/reject feedback from the execution collaborator. The machine
/// constructs and retires `Position`s itself from these facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionUpdate {
    EntryFilled {
        intent_id: String,
        symbol: String,
        fill_price: f64,
        fill_time: DateTime<Utc>,
    },
    ExitFilled {
        intent_id: String,
        symbol: String,
        fill_price: f64,
        fill_time: DateTime<Utc>,
    },
    Rejected {
        intent_id: String,
        reason: String,
    },
}

/// One point of the backtest equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}
