//! In-memory test doubles, mirroring the shape of the SQLite adapters.
//! Used by integration tests in `tests/` to exercise the application layer
//! without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::connector::{AcquireOutcome, Connector};
use crate::domain::errors::{GatewayError, RepositoryError};
use crate::domain::job::{Job, JobStatus};
use crate::domain::market::candle::{Candle, RawCandle};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::ports::ExchangeGateway;
use crate::domain::quality::QualityRecord;
use crate::domain::repositories::{CandleRepository, ConnectorRepository, JobRepository, QualityRepository, RunOutcome};

/// Scripted fetch responses keyed by `(symbol, window.since)`. Lets tests
/// stage gateway errors (rate limits, transient outages) for a specific
/// call without modeling a full fake exchange.
#[derive(Default)]
pub struct MockExchangeGateway {
    responses: Mutex<Vec<Result<Vec<RawCandle>, GatewayError>>>,
    calls: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
}

impl MockExchangeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses are consumed front-to-back, one per `fetch_candles` call;
    /// the last response repeats once the queue is exhausted.
    pub fn push_response(&self, response: Result<Vec<RawCandle>, GatewayError>) {
        self.responses.lock().unwrap().push(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ExchangeGateway for MockExchangeGateway {
    async fn list_symbols(&self, _exchange_id: &str) -> Result<Vec<String>, GatewayError> {
        Ok(Vec::new())
    }

    async fn list_timeframes(
        &self,
        _exchange_id: &str,
    ) -> Result<Vec<(Timeframe, i64)>, GatewayError> {
        Ok(Timeframe::all().into_iter().map(|t| (t, t.to_seconds())).collect())
    }

    async fn fetch_candles(
        &self,
        _exchange_id: &str,
        symbol: &str,
        _timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        _limit: u32,
    ) -> Result<Vec<RawCandle>, GatewayError> {
        self.calls.lock().unwrap().push((symbol.to_string(), since, until));

        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.remove(0)
        } else if let Some(last) = responses.first() {
            last.clone()
        } else {
            Ok(Vec::new())
        }
    }
}

#[derive(Default)]
pub struct InMemoryConnectorRepository {
    connectors: Mutex<BTreeMap<String, Connector>>,
}

impl InMemoryConnectorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectorRepository for InMemoryConnectorRepository {
    async fn get(&self, exchange_id: &str) -> Result<Option<Connector>, RepositoryError> {
        Ok(self.connectors.lock().unwrap().get(exchange_id).cloned())
    }

    async fn upsert(&self, connector: &Connector) -> Result<(), RepositoryError> {
        self.connectors
            .lock()
            .unwrap()
            .insert(connector.exchange_id.clone(), connector.clone());
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Connector>, RepositoryError> {
        Ok(self
            .connectors
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect())
    }

    async fn try_acquire(
        &self,
        exchange_id: &str,
        weight: i64,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, RepositoryError> {
        let mut connectors = self.connectors.lock().unwrap();
        let connector = connectors
            .get_mut(exchange_id)
            .ok_or_else(|| RepositoryError::NotFound(exchange_id.to_string()))?;
        let rl = &mut connector.rate_limit;

        if (now - rl.period_start).num_milliseconds() >= rl.period_ms {
            rl.period_start = now;
            rl.usage = 0;
        }

        if let Some(last) = rl.last_api_call_at {
            let since_last_ms = (now - last).num_milliseconds();
            if since_last_ms < rl.min_delay_ms {
                return Ok(AcquireOutcome::Denied {
                    wait_hint_ms: rl.min_delay_ms - since_last_ms,
                });
            }
        }

        if rl.usage + weight > rl.limit {
            let wait_hint_ms = rl.period_ms - (now - rl.period_start).num_milliseconds();
            return Ok(AcquireOutcome::Denied { wait_hint_ms });
        }

        rl.usage += weight;
        rl.last_api_call_at = Some(now);
        Ok(AcquireOutcome::Granted)
    }

    async fn reset_rate_limit(
        &self,
        exchange_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if let Some(connector) = self.connectors.lock().unwrap().get_mut(exchange_id) {
            connector.rate_limit.usage = 0;
            connector.rate_limit.period_start = now;
        }
        Ok(())
    }

    async fn update_rate_limits(
        &self,
        exchange_id: &str,
        limit: i64,
        min_delay_ms: i64,
    ) -> Result<(), RepositoryError> {
        if let Some(connector) = self.connectors.lock().unwrap().get_mut(exchange_id) {
            connector.rate_limit.limit = limit;
            connector.rate_limit.min_delay_ms = min_delay_ms;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<BTreeMap<Uuid, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, RepositoryError> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn get_by_key(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Job>, RepositoryError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .find(|j| j.exchange_id == exchange_id && j.symbol == symbol && j.timeframe == timeframe)
            .cloned())
    }

    async fn upsert(&self, job: &Job) -> Result<(), RepositoryError> {
        self.jobs.lock().unwrap().insert(job.job_id, job.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Job>, RepositoryError> {
        Ok(self.jobs.lock().unwrap().values().cloned().collect())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, RepositoryError> {
        let mut due: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|j| j.run_state.next_run_time);
        Ok(due)
    }

    async fn try_acquire_lock(
        &self,
        job_id: Uuid,
        nonce: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.lock.is_held_at(now) {
            return Ok(false);
        }
        job.lock.locked_until = Some(now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()));
        job.lock.owner_nonce = Some(nonce);
        Ok(true)
    }

    async fn release_lock(&self, job_id: Uuid, nonce: Uuid) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id)
            && job.lock.owner_nonce == Some(nonce)
        {
            job.lock.locked_until = None;
            job.lock.owner_nonce = None;
        }
        Ok(())
    }

    async fn heartbeat_lock(
        &self,
        job_id: Uuid,
        nonce: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.lock.owner_nonce != Some(nonce) {
            return Ok(false);
        }
        job.lock.locked_until = Some(now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()));
        Ok(true)
    }

    async fn advance_cursor(
        &self,
        job_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.cursor.last_candle_time != from {
            return Ok(false);
        }
        job.cursor.last_candle_time = Some(to);
        Ok(true)
    }

    async fn record_run(&self, job_id: Uuid, outcome: RunOutcome) -> Result<(), RepositoryError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.run_state.last_run_time = Some(outcome.last_run_time);
            job.run_state.next_run_time = outcome.next_run_time;
            job.run_state.last_error = outcome.last_error;
            job.run_state.runs_total = outcome.runs_total;
        }
        Ok(())
    }

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), RepositoryError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.status = status;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCandleRepository {
    candles: Mutex<HashMap<(String, String, Timeframe, DateTime<Utc>), Candle>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(exchange_id: &str, symbol: &str, timeframe: Timeframe, open_time: DateTime<Utc>) -> (String, String, Timeframe, DateTime<Utc>) {
        (exchange_id.to_string(), symbol.to_string(), timeframe, open_time)
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<(), RepositoryError> {
        let mut store = self.candles.lock().unwrap();
        for c in candles {
            let key = Self::key(&c.exchange_id, &c.symbol, c.timeframe, c.open_time);
            store.insert(key, c.clone());
        }
        Ok(())
    }

    async fn range(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, RepositoryError> {
        let store = self.candles.lock().unwrap();
        let mut result: Vec<Candle> = store
            .values()
            .filter(|c| c.exchange_id == exchange_id && c.symbol == symbol && c.timeframe == timeframe)
            .filter(|c| since.is_none_or(|s| c.open_time >= s))
            .filter(|c| until.is_none_or(|u| c.open_time < u))
            .cloned()
            .collect();
        result.sort_by_key(|c| c.open_time);
        Ok(result)
    }

    async fn earliest(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, RepositoryError> {
        Ok(self
            .range(exchange_id, symbol, timeframe, None, None)
            .await?
            .into_iter()
            .next())
    }

    async fn latest(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, RepositoryError> {
        Ok(self
            .range(exchange_id, symbol, timeframe, None, None)
            .await?
            .into_iter()
            .next_back())
    }

    async fn count(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<i64, RepositoryError> {
        Ok(self.range(exchange_id, symbol, timeframe, None, None).await?.len() as i64)
    }

    async fn update_indicators(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
        indicators: BTreeMap<String, f64>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.candles.lock().unwrap();
        let key = Self::key(exchange_id, symbol, timeframe, open_time);
        if let Some(candle) = store.get_mut(&key) {
            candle.indicators = indicators;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryQualityRepository {
    records: Mutex<HashMap<(String, String, Timeframe), QualityRecord>>,
}

impl InMemoryQualityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QualityRepository for InMemoryQualityRepository {
    async fn save(&self, record: &QualityRecord) -> Result<(), RepositoryError> {
        self.records.lock().unwrap().insert(
            (record.exchange_id.clone(), record.symbol.clone(), record.timeframe),
            record.clone(),
        );
        Ok(())
    }

    async fn get(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<QualityRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(exchange_id.to_string(), symbol.to_string(), timeframe))
            .cloned())
    }
}
