use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{Bar, Error, MarketFeed, Result, Timeframe};

/// Number of bars held back on the first fetch and trickled out one per
/// poll afterwards, so the paper session sees a moving tape.
const TAIL_BARS: usize = 12;

struct SeriesCursor {
    bars: Vec<Bar>,
    served: usize,
}

/// `MarketFeed` backed by the historical CSV directory: the first fetch
/// backfills most of the series, then each poll releases one more bar.
/// Lets the live loop be exercised end-to-end with no vendor attached;
/// decisions are still clocked by the wall clock.
pub struct ReplayFeed {
    series: Mutex<BTreeMap<(String, Timeframe), SeriesCursor>>,
    prices: Mutex<HashMap<String, f64>>,
}

impl ReplayFeed {
    pub fn new(bars: BTreeMap<(String, Timeframe), Vec<Bar>>) -> Self {
        let series = bars
            .into_iter()
            .map(|(key, bars)| (key, SeriesCursor { bars, served: 0 }))
            .collect();
        Self {
            series: Mutex::new(series),
            prices: Mutex::new(HashMap::new()),
        }
    }

    /// Latest close served per symbol, for the paper execution desk.
    pub fn last_prices(&self) -> HashMap<String, f64> {
        self.prices
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MarketFeed for ReplayFeed {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>> {
        let mut series = self
            .series
            .lock()
            .map_err(|_| Error::Feed("replay feed poisoned".to_string()))?;
        let Some(cursor) = series.get_mut(&(symbol.to_string(), timeframe)) else {
            return Err(Error::Feed(format!("no tape for {symbol} {timeframe}")));
        };

        let remaining = cursor.bars.len() - cursor.served;
        let take = if cursor.served == 0 {
            remaining.saturating_sub(TAIL_BARS).max(remaining.min(1))
        } else {
            remaining.min(1)
        };
        let chunk = cursor.bars[cursor.served..cursor.served + take].to_vec();
        cursor.served += take;

        if let Some(last) = chunk.last() {
            if let Ok(mut prices) = self.prices.lock() {
                prices.insert(symbol.to_string(), last.close);
            }
        }
        Ok(chunk)
    }
}
