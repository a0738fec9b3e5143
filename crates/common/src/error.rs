use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::Timeframe;

#[derive(Debug, Error)]
pub enum Error {
    /// A timeframe's history is shorter than the indicator window.
    /// Recoverable: callers drop that timeframe's vote to zero weight.
    #[error("insufficient data for {symbol} {timeframe}: need {required} bars, have {available}")]
    InsufficientData {
        symbol: String,
        timeframe: Timeframe,
        required: usize,
        available: usize,
    },

    /// A weight outside (0, 1], or an index whose weights sum above 1.
    #[error("invalid weight {weight} for {symbol} in index '{index}'")]
    InvalidWeight {
        index: String,
        symbol: String,
        weight: f64,
    },

    /// No non-neutral signals exist in either direction.
    #[error("no non-neutral signals in the universe")]
    EmptyUniverse,

    /// The feed collaborator delivered a bar at or before the last stored
    /// timestamp. Halts ingestion for that series only.
    #[error("out-of-order bar for {symbol} {timeframe}: last {last}, got {attempted}")]
    OutOfOrderBar {
        symbol: String,
        timeframe: Timeframe,
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    /// A logic defect in the session state machine. Fatal: the session
    /// must abort rather than silently recover.
    #[error("state invariant violated: {0}")]
    StateInvariantViolation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("data file error: {0}")]
    Data(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
