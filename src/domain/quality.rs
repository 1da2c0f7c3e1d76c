use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::market::timeframe::Timeframe;

/// Maximal contiguous range of missing `open_time` values between two
/// stored candles, expressed as a half-open interval on the timeframe grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Gap {
    pub fn missing_candles(&self, timeframe_seconds: i64) -> i64 {
        let span = (self.end - self.start).num_seconds();
        span / timeframe_seconds - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityStatus {
    /// `excellent >= 99`, `good >= 95`, `fair >= 80`, else `poor`.
    pub fn from_completeness(completeness_pct: f64) -> Self {
        if completeness_pct >= 99.0 {
            QualityStatus::Excellent
        } else if completeness_pct >= 95.0 {
            QualityStatus::Good
        } else if completeness_pct >= 80.0 {
            QualityStatus::Fair
        } else {
            QualityStatus::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    Fresh,
    Stale,
    VeryStale,
}

impl Freshness {
    /// `fresh <= 2*tf`, `stale <= 24*tf`, else `very_stale`.
    pub fn from_age(age_seconds: i64, timeframe_seconds: i64) -> Self {
        if age_seconds <= 2 * timeframe_seconds {
            Freshness::Fresh
        } else if age_seconds <= 24 * timeframe_seconds {
            Freshness::Stale
        } else {
            Freshness::VeryStale
        }
    }
}

/// `(exchange_id, symbol, timeframe) -> {total, expected, missing, gaps[],
/// period_start, period_end, freshness, checked_at}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRecord {
    pub exchange_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub total: i64,
    pub expected: i64,
    pub missing: i64,
    pub gaps: Vec<Gap>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub quality_status: QualityStatus,
    pub freshness: Freshness,
    pub checked_at: DateTime<Utc>,
}

impl QualityRecord {
    pub fn completeness_pct(&self) -> f64 {
        if self.expected <= 0 {
            return 100.0;
        }
        100.0 * (self.total as f64) / (self.expected as f64)
    }
}
