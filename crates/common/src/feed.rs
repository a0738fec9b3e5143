use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Bar, Result, Timeframe};

/// Abstraction over the market data collaborator.
///
/// Vendors implement this for live sessions; the backtest never touches it
/// (history is materialized into the bar store up front). The core must
/// never branch on provider identity — per-provider quirks stay behind
/// this boundary.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Fetch bars for one (symbol, timeframe), strictly after `since` when
    /// given. Returned bars must be in ascending timestamp order; the bar
    /// store rejects anything else.
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>>;
}
