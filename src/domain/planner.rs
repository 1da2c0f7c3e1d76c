use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use super::job::Cursor;
use super::market::candle::FetchWindow;
use super::market::timeframe::Timeframe;
use super::tasks::FetchIntent;

/// Computes the next fetch window(s) from `(cursor, now, timeframe, intent)`.
/// A pure function: same inputs always produce the same finite, restartable
/// sequence of windows (§4.4, §9 "generators").
pub struct FetchPlanner {
    pub timeframe: Timeframe,
    pub default_limit: u32,
}

impl FetchPlanner {
    pub fn new(timeframe: Timeframe, default_limit: u32) -> Self {
        Self {
            timeframe,
            default_limit,
        }
    }

    fn floor_to_grid(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let ms = self.timeframe.period_start(at.timestamp_millis());
        Utc.timestamp_millis_opt(ms).single().unwrap_or(at)
    }

    fn tf_duration(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.timeframe.to_seconds())
    }

    /// Plans windows for `intent`. Never requests the currently-open
    /// candle (`open_time == floor(now, tf)`), since it has not closed.
    pub fn plan(
        &self,
        cursor: &Cursor,
        now: DateTime<Utc>,
        intent: FetchIntent,
    ) -> Vec<FetchWindow> {
        match intent {
            FetchIntent::Live => self.plan_live(cursor, now),
            FetchIntent::Backfill => self.plan_backfill_first(cursor, now),
            FetchIntent::GapFill {
                range_start,
                range_end,
            } => self.plan_tiled(range_start, range_end),
        }
    }

    /// Live: single window `[cursor + tf, floor(now, tf))`. Empty means no
    /// closed candle since cursor — a no-op success, not an error.
    fn plan_live(&self, cursor: &Cursor, now: DateTime<Utc>) -> Vec<FetchWindow> {
        let floor_now = self.floor_to_grid(now);
        let since = match cursor.last_candle_time {
            Some(last) => last + self.tf_duration(),
            None => floor_now,
        };
        let window = FetchWindow {
            since,
            until: floor_now,
        };
        if window.is_empty() {
            Vec::new()
        } else {
            vec![window]
        }
    }

    /// Backfill: a single step marching backward from the oldest stored
    /// candle (carried by the caller as `cursor.last_candle_time` is not
    /// the oldest bound; callers of Backfill pass the oldest-known bound
    /// through `plan_backfill_step`). `plan_backfill_first` exists only to
    /// satisfy the generic `plan` dispatch and defers to a window ending
    /// at `floor(now, tf)`.
    fn plan_backfill_first(&self, _cursor: &Cursor, now: DateTime<Utc>) -> Vec<FetchWindow> {
        let floor_now = self.floor_to_grid(now);
        let until = floor_now;
        let since = until - self.tf_duration() * (self.default_limit as i32);
        vec![FetchWindow { since, until }]
    }

    /// One backward-marching chunk of `limit * tf` ending at `oldest`,
    /// truncated so it never goes earlier than `target`.
    pub fn plan_backfill_step(
        &self,
        oldest: DateTime<Utc>,
        target: DateTime<Utc>,
    ) -> Option<FetchWindow> {
        if oldest <= target {
            return None;
        }
        let chunk = self.tf_duration() * (self.default_limit as i32);
        let since = std::cmp::max(oldest - chunk, target);
        Some(FetchWindow {
            since,
            until: oldest,
        })
    }

    /// GapFill: tiles `[start, end)` in `limit`-sized chunks.
    fn plan_tiled(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<FetchWindow> {
        let chunk = self.tf_duration() * (self.default_limit as i32);
        let mut windows = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let until = std::cmp::min(cursor + chunk, end);
            windows.push(FetchWindow {
                since: cursor,
                until,
            });
            cursor = until;
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[test]
    fn live_plans_single_window_from_cursor() {
        let planner = FetchPlanner::new(Timeframe::OneHour, 500);
        let cursor = Cursor {
            last_candle_time: Some(dt(2026, 1, 18, 9, 0)),
        };
        let now = dt(2026, 1, 18, 12, 30);

        let windows = planner.plan(&cursor, now, FetchIntent::Live);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].since, dt(2026, 1, 18, 10, 0));
        assert_eq!(windows[0].until, dt(2026, 1, 18, 12, 0));
    }

    #[test]
    fn live_yields_no_windows_when_nothing_closed_since_cursor() {
        let planner = FetchPlanner::new(Timeframe::OneHour, 500);
        let cursor = Cursor {
            last_candle_time: Some(dt(2026, 1, 18, 12, 0)),
        };
        let now = dt(2026, 1, 18, 12, 30);

        let windows = planner.plan(&cursor, now, FetchIntent::Live);
        assert!(windows.is_empty());
    }

    #[test]
    fn gap_fill_tiles_range_in_limit_sized_chunks() {
        let planner = FetchPlanner::new(Timeframe::OneHour, 2);
        let start = dt(2026, 1, 15, 0, 0);
        let end = dt(2026, 1, 15, 5, 0);

        let windows = planner.plan(
            &Cursor::empty(),
            Utc::now(),
            FetchIntent::GapFill {
                range_start: start,
                range_end: end,
            },
        );

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], FetchWindow {
            since: dt(2026, 1, 15, 0, 0),
            until: dt(2026, 1, 15, 2, 0)
        });
        assert_eq!(windows[2], FetchWindow {
            since: dt(2026, 1, 15, 4, 0),
            until: dt(2026, 1, 15, 5, 0)
        });
    }

    #[test]
    fn backfill_step_truncates_at_target() {
        let planner = FetchPlanner::new(Timeframe::OneHour, 10);
        let oldest = dt(2026, 1, 10, 0, 0);
        let target = dt(2026, 1, 9, 18, 0);

        let window = planner.plan_backfill_step(oldest, target).unwrap();
        assert_eq!(window.since, target);
        assert_eq!(window.until, oldest);
    }

    #[test]
    fn backfill_step_returns_none_once_target_reached() {
        let planner = FetchPlanner::new(Timeframe::OneHour, 10);
        let oldest = dt(2026, 1, 9, 18, 0);
        assert!(planner.plan_backfill_step(oldest, oldest).is_none());
    }
}
