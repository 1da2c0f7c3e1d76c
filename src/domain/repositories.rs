use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::connector::{AcquireOutcome, Connector};
use super::errors::RepositoryError;
use super::job::{Job, JobStatus};
use super::market::candle::Candle;
use super::market::timeframe::Timeframe;
use super::quality::QualityRecord;

/// What a completed (or failed, non-crashed) attempt writes back onto the
/// job row in one shot (§4.5 step 8).
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub last_run_time: DateTime<Utc>,
    pub next_run_time: DateTime<Utc>,
    pub last_error: Option<String>,
    pub runs_total: u64,
}

/// The Connector half of the Repository capability (§6.2): unique on
/// `exchange_id`, owns the rate-limit row exclusively.
#[async_trait]
pub trait ConnectorRepository: Send + Sync {
    async fn get(&self, exchange_id: &str) -> Result<Option<Connector>, RepositoryError>;

    async fn upsert(&self, connector: &Connector) -> Result<(), RepositoryError>;

    async fn list_active(&self) -> Result<Vec<Connector>, RepositoryError>;

    /// Atomic conditional update implementing the RateLimiter algorithm
    /// (§4.1 steps 1-5) as a single-document operation. The correctness
    /// anchor: two callers racing on the same connector with
    /// `usage = limit - 1` must not both be granted.
    async fn try_acquire(
        &self,
        exchange_id: &str,
        weight: i64,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, RepositoryError>;

    /// Admin: `usage := 0`, `period_start := now`.
    async fn reset_rate_limit(
        &self,
        exchange_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Admin: updates `limit`/`min_delay_ms` without disturbing `usage`.
    async fn update_rate_limits(
        &self,
        exchange_id: &str,
        limit: i64,
        min_delay_ms: i64,
    ) -> Result<(), RepositoryError>;
}

/// The Job half of the Repository capability. A Job exclusively owns its
/// cursor and run-state rows; the lock holder is the sole writer.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, RepositoryError>;

    async fn get_by_key(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Job>, RepositoryError>;

    async fn upsert(&self, job: &Job) -> Result<(), RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Job>, RepositoryError>;

    /// Jobs with `status = active` and `next_run_time <= now`, ordered by
    /// `next_run_time` ascending (the Scheduler's picker query, §4.7).
    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, RepositoryError>;

    /// `Acquire(job_id, ttl)`: grants iff `locked_until` is null or past,
    /// atomically setting `locked_until := now + ttl` and recording
    /// `owner_nonce` in the same update (§4.2).
    async fn try_acquire_lock(
        &self,
        job_id: Uuid,
        nonce: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// `Release(job_id)`: clears `locked_until` only if `nonce` still
    /// matches the current owner.
    async fn release_lock(&self, job_id: Uuid, nonce: Uuid) -> Result<(), RepositoryError>;

    /// `Heartbeat(job_id, ttl)`: extends `locked_until` iff `nonce` still
    /// matches the current owner.
    async fn heartbeat_lock(
        &self,
        job_id: Uuid,
        nonce: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// `Advance(job_id, from, to)`: sets `last_candle_time := max(.., to)`
    /// conditional on `from == last_candle_time`. Returns `false` (not an
    /// error) if another writer advanced in the meantime (§4.3).
    async fn advance_cursor(
        &self,
        job_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn record_run(&self, job_id: Uuid, outcome: RunOutcome) -> Result<(), RepositoryError>;

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), RepositoryError>;
}

/// The Candle half of the Repository capability: idempotent upsert by
/// compound key, indexed range scans.
#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Idempotent upsert by `(exchange_id, symbol, timeframe, open_time)`.
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<(), RepositoryError>;

    async fn range(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, RepositoryError>;

    async fn earliest(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, RepositoryError>;

    async fn latest(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, RepositoryError>;

    async fn count(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<i64, RepositoryError>;

    /// Updates the `indicators` mapping for an already-stored candle in
    /// place, without touching OHLCV fields.
    async fn update_indicators(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
        indicators: BTreeMap<String, f64>,
    ) -> Result<(), RepositoryError>;
}

/// Stores the latest `QualityRecord` snapshot per job.
#[async_trait]
pub trait QualityRepository: Send + Sync {
    async fn save(&self, record: &QualityRecord) -> Result<(), RepositoryError>;

    async fn get(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<QualityRecord>, RepositoryError>;
}
