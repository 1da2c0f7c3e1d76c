use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a `Connector`: never auto-deleted, only suspended/resumed
/// by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Active,
    Suspended,
}

/// Persisted rate-limit state for one connector. `usage <= limit` is an
/// invariant enforced transactionally by the repository's conditional
/// update, never by this struct alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub limit: i64,
    pub period_ms: i64,
    pub min_delay_ms: i64,
    pub usage: i64,
    pub period_start: DateTime<Utc>,
    pub last_api_call_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    pub fn new(limit: i64, period_ms: i64, min_delay_ms: i64, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            period_ms,
            min_delay_ms,
            usage: 0,
            period_start: now,
            last_api_call_at: None,
        }
    }
}

/// `(exchange_id -> metadata, rate_limit_state)`. `exchange_id` is unique
/// across the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub exchange_id: String,
    pub status: ConnectorStatus,
    pub rate_limit: RateLimitState,
}

impl Connector {
    pub fn new(exchange_id: impl Into<String>, rate_limit: RateLimitState) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            status: ConnectorStatus::Active,
            rate_limit,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConnectorStatus::Active
    }
}

/// Outcome of a `RateLimiter::acquire` call. Denial is not an error;
/// callers sleep `wait_hint_ms` and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    Denied { wait_hint_ms: i64 },
}
