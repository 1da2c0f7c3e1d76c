use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market::timeframe::Timeframe;

/// Only `Active` jobs are picked up by the Scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Active,
    Paused,
    Failed,
}

/// Per-job `last_candle_time` cursor and gap registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub last_candle_time: Option<DateTime<Utc>>,
}

impl Cursor {
    pub fn empty() -> Self {
        Self {
            last_candle_time: None,
        }
    }
}

/// Mutual-exclusion lease on a job. `owner_nonce` guards `Release` against
/// a stale worker whose lease already expired clearing a new owner's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLockState {
    pub locked_until: Option<DateTime<Utc>>,
    pub owner_nonce: Option<Uuid>,
}

impl JobLockState {
    pub fn unlocked() -> Self {
        Self {
            locked_until: None,
            owner_nonce: None,
        }
    }

    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        match self.locked_until {
            Some(until) => until > now,
            None => false,
        }
    }
}

/// `{locked_until, last_run_time, next_run_time, last_error, runs_total}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: DateTime<Utc>,
    pub last_error: Option<String>,
    pub runs_total: u64,
}

/// The `(exchange_id, symbol, timeframe)` triple is globally unique; at
/// most one active run at a time, enforced by `JobLock`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub exchange_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub status: JobStatus,
    pub cursor: Cursor,
    pub lock: JobLockState,
    pub run_state: RunState,
    /// Overrides the connector's default indicator configuration when set.
    pub indicator_config_override: Option<String>,
}

impl Job {
    pub fn new(
        exchange_id: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            exchange_id: exchange_id.into(),
            symbol: symbol.into(),
            timeframe,
            status: JobStatus::Active,
            cursor: Cursor::empty(),
            lock: JobLockState::unlocked(),
            run_state: RunState {
                last_run_time: None,
                next_run_time: now,
                last_error: None,
                runs_total: 0,
            },
            indicator_config_override: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active && self.run_state.next_run_time <= now
    }
}
