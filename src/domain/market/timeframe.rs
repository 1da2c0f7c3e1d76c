use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bar duration. Members of `{1m, 5m, 15m, 30m, 1h, 4h, 1d, 1w}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
    FourHour,
    OneDay,
    OneWeek,
}

impl Timeframe {
    /// Duration of this timeframe in minutes.
    pub fn to_minutes(&self) -> usize {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::ThirtyMin => 30,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
            Timeframe::OneWeek => 1440 * 7,
        }
    }

    /// Duration in seconds.
    pub fn to_seconds(&self) -> i64 {
        (self.to_minutes() * 60) as i64
    }

    /// Converts to Binance API interval string.
    pub fn to_binance_string(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::ThirtyMin => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
            Timeframe::OneWeek => "1w",
        }
    }

    /// Canonical storage label, e.g. used as the `timeframe` column value.
    pub fn label(&self) -> &'static str {
        self.to_binance_string()
    }

    /// All timeframes in ascending order.
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::OneMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::ThirtyMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
            Timeframe::OneWeek,
        ]
    }

    /// Whether `timestamp_ms` aligns with the start of a period of this
    /// timeframe, on the UTC epoch grid.
    pub fn is_period_start(&self, timestamp_ms: i64) -> bool {
        self.period_start(timestamp_ms) == timestamp_ms
    }

    /// Start timestamp (ms) of the period containing `timestamp_ms`,
    /// rounding down to the nearest grid boundary measured from the UNIX
    /// epoch in UTC. Weeks are epoch-aligned (not Monday-aligned).
    pub fn period_start(&self, timestamp_ms: i64) -> i64 {
        let timestamp_sec = timestamp_ms.div_euclid(1000);
        let period_sec = self.to_seconds();
        let period_start_sec = timestamp_sec.div_euclid(period_sec) * period_sec;
        period_start_sec * 1000
    }

    /// Number of candles of this timeframe needed before an indicator with
    /// the given period is considered warmed up. Adds a 10% buffer.
    pub fn warmup_candles(&self, indicator_period: usize) -> usize {
        ((indicator_period as f64) * 1.1).ceil() as usize
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" | "onemin" => Ok(Timeframe::OneMin),
            "5m" | "5min" | "fivemin" => Ok(Timeframe::FiveMin),
            "15m" | "15min" | "fifteenmin" => Ok(Timeframe::FifteenMin),
            "30m" | "30min" | "thirtymin" => Ok(Timeframe::ThirtyMin),
            "1h" | "1hour" | "onehour" => Ok(Timeframe::OneHour),
            "4h" | "4hour" | "fourhour" => Ok(Timeframe::FourHour),
            "1d" | "1day" | "oneday" => Ok(Timeframe::OneDay),
            "1w" | "1week" | "oneweek" => Ok(Timeframe::OneWeek),
            _ => Err(anyhow!(
                "invalid timeframe: '{}'. valid options: 1m, 5m, 15m, 30m, 1h, 4h, 1d, 1w",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_binance_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_minutes_covers_all_variants() {
        assert_eq!(Timeframe::OneMin.to_minutes(), 1);
        assert_eq!(Timeframe::FiveMin.to_minutes(), 5);
        assert_eq!(Timeframe::FifteenMin.to_minutes(), 15);
        assert_eq!(Timeframe::ThirtyMin.to_minutes(), 30);
        assert_eq!(Timeframe::OneHour.to_minutes(), 60);
        assert_eq!(Timeframe::FourHour.to_minutes(), 240);
        assert_eq!(Timeframe::OneDay.to_minutes(), 1440);
        assert_eq!(Timeframe::OneWeek.to_minutes(), 10080);
    }

    #[test]
    fn from_str_round_trips_canonical_labels() {
        for tf in Timeframe::all() {
            assert_eq!(Timeframe::from_str(tf.label()).unwrap(), tf);
        }
        assert!(Timeframe::from_str("invalid").is_err());
    }

    #[test]
    fn period_start_aligns_to_five_minute_grid() {
        let tf = Timeframe::FiveMin;
        let base = 1704067200000i64; // 2024-01-01 00:00:00 UTC

        assert_eq!(tf.period_start(base), base);
        assert_eq!(tf.period_start(base + 3 * 60 * 1000), base);
        assert_eq!(tf.period_start(base + 5 * 60 * 1000), base + 5 * 60 * 1000);
        assert_eq!(tf.period_start(base + 7 * 60 * 1000), base + 5 * 60 * 1000);
    }

    #[test]
    fn is_period_start_matches_grid_boundaries() {
        let tf = Timeframe::FiveMin;
        let base = 1704067200000i64;

        assert!(tf.is_period_start(base));
        assert!(tf.is_period_start(base + 5 * 60 * 1000));
        assert!(!tf.is_period_start(base + 3 * 60 * 1000));
    }

    #[test]
    fn one_week_aligns_to_epoch_not_monday() {
        let tf = Timeframe::OneWeek;
        // epoch (1970-01-01) is itself a week boundary
        assert!(tf.is_period_start(0));
        assert_eq!(tf.period_start(6 * 86_400_000), 0);
        assert_eq!(tf.period_start(7 * 86_400_000), 7 * 86_400_000);
    }

    #[test]
    fn warmup_candles_adds_ten_percent_buffer() {
        assert_eq!(Timeframe::OneHour.warmup_candles(50), 55);
    }
}
