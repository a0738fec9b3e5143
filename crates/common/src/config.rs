/// Whether the bot replays history or paper-trades a live-shaped session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Backtest,
    Paper,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Backtest => write!(f, "backtest"),
            RunMode::Paper => write!(f, "paper"),
        }
    }
}

/// All process-level configuration loaded from environment variables at
/// startup. Missing required variables cause an immediate panic with a
/// clear message.
#[derive(Debug, Clone)]
pub struct Config {
    pub run_mode: RunMode,

    /// Directory of historical bar CSVs (`SYMBOL_TIMEFRAME.csv`).
    pub data_dir: String,

    /// Index weight table snapshot (TOML), loaded once per session.
    pub weights_path: String,

    /// Scorer/session/backtest parameter file (TOML).
    pub strategy_config_path: String,

    /// Seconds between live evaluation cycles.
    pub cycle_interval_secs: u64,

    /// Paper execution slippage in basis points.
    pub paper_slippage_bps: f64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let run_mode = match required_env("RUN_MODE").to_lowercase().as_str() {
            "backtest" => RunMode::Backtest,
            "paper" => RunMode::Paper,
            other => panic!("ERROR: RUN_MODE must be 'backtest' or 'paper', got: '{other}'"),
        };

        Config {
            run_mode,
            data_dir: optional_env("DATA_DIR").unwrap_or_else(|| "data".to_string()),
            weights_path: optional_env("WEIGHTS_PATH")
                .unwrap_or_else(|| "config/weights.toml".to_string()),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategy.toml".to_string()),
            cycle_interval_secs: optional_env("CYCLE_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            paper_slippage_bps: optional_env("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
