use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::timeframe::Timeframe;

/// A single OHLCV bar returned by an `ExchangeGateway`, prior to storage.
/// `open_time` is expected to already be aligned to the timeframe grid by
/// the time a `RawCandle` reaches `CandleStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// The stored entity, keyed by `(exchange_id, symbol, timeframe, open_time)`.
/// `indicators` maps indicator label to scalar value; a missing key means
/// "not yet computed", which is legal and distinct from an explicit null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub exchange_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub indicators: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

impl Candle {
    pub fn from_raw(
        exchange_id: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        raw: RawCandle,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            symbol: symbol.into(),
            timeframe,
            open_time: raw.open_time,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
            indicators: BTreeMap::new(),
            created_at,
        }
    }

    /// `open_time` rounded onto the timeframe grid, as §4.5 requires before
    /// a fetched candle may be upserted.
    pub fn is_grid_aligned(&self) -> bool {
        self.timeframe
            .is_period_start(self.open_time.timestamp_millis())
    }
}

/// A half-open `[since, until)` window on the timeframe grid, the unit of
/// work a `FetchPlanner` hands to an `ExchangeGateway`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl FetchWindow {
    pub fn is_empty(&self) -> bool {
        self.since >= self.until
    }
}
