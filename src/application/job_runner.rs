use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::clock::Clock;
use crate::domain::errors::{GatewayError, RunError};
use crate::domain::indicators::{IndicatorConfig, IndicatorEngine};
use crate::domain::job::{Job, JobStatus};
use crate::domain::market::candle::{Candle, FetchWindow, RawCandle};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::planner::FetchPlanner;
use crate::domain::ports::ExchangeGateway;
use crate::domain::repositories::{CandleRepository, JobRepository, RunOutcome};
use crate::domain::tasks::FetchIntent;

use super::cancellation::CancellationToken;
use super::job_lock::JobLock;
use super::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy)]
pub struct JobRunnerConfig {
    pub lock_ttl: StdDuration,
    pub max_transient_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub default_fetch_limit: u32,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            lock_ttl: StdDuration::from_secs(150),
            max_transient_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            default_fetch_limit: 500,
        }
    }
}

/// Outcome of a single successful (or no-op) JobRunner attempt.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub candles_upserted: u64,
    pub cursor_advanced_to: Option<DateTime<Utc>>,
}

/// Executes one job attempt end to end (§4.5): acquire lock, plan, fetch
/// under rate limiting, normalize, upsert, recompute indicators, advance
/// cursor, record the run, release the lock.
pub struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    candles: Arc<dyn CandleRepository>,
    gateway: Arc<dyn ExchangeGateway>,
    rate_limiter: Arc<RateLimiter>,
    job_lock: Arc<JobLock>,
    clock: Arc<dyn Clock>,
    config: JobRunnerConfig,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        candles: Arc<dyn CandleRepository>,
        gateway: Arc<dyn ExchangeGateway>,
        rate_limiter: Arc<RateLimiter>,
        job_lock: Arc<JobLock>,
        clock: Arc<dyn Clock>,
        config: JobRunnerConfig,
    ) -> Self {
        Self {
            jobs,
            candles,
            gateway,
            rate_limiter,
            job_lock,
            clock,
            config,
        }
    }

    /// One full attempt for `job_id` under `intent`. Live runs use the
    /// job's persisted cursor; Backfill/GapFill intents are driven by
    /// `BackfillDriver`/`GapFillDriver` with an explicit intent.
    pub async fn run_once(
        &self,
        job_id: Uuid,
        intent: FetchIntent,
        indicator_config: &IndicatorConfig,
        cancellation: &CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| RunError::Integrity(format!("job {job_id} not found")))?;

        let Some(guard) = self.job_lock.acquire(job_id, self.config.lock_ttl).await? else {
            debug!(%job_id, "job lock held by another worker, skipping");
            return Err(RunError::LockHeld);
        };

        let result = self
            .run_locked(&job, intent, indicator_config, cancellation)
            .await;

        if let Err(e) = self.job_lock.release(&guard).await {
            warn!(%job_id, error = %e, "failed to release job lock");
        }

        result
    }

    async fn run_locked(
        &self,
        job: &Job,
        intent: FetchIntent,
        indicator_config: &IndicatorConfig,
        cancellation: &CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let now = self.clock.now();
        let floor_now = floor_to_grid(job.timeframe, now);

        if let Some(last) = job.cursor.last_candle_time
            && last > floor_now
        {
            let message = format!(
                "cursor {last} is ahead of floor(now, tf) {floor_now}"
            );
            self.record_failure(job, now, message.clone()).await?;
            self.jobs.set_status(job.job_id, JobStatus::Failed).await?;
            return Err(RunError::Integrity(message));
        }

        if cancellation.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let planner = FetchPlanner::new(job.timeframe, self.config.default_fetch_limit);
        let windows = planner.plan(&job.cursor, now, intent);

        if windows.is_empty() {
            self.record_success(job, now).await?;
            return Ok(RunSummary::default());
        }

        let mut highest_open_time = job.cursor.last_candle_time;
        let mut total_upserted = 0u64;

        for window in windows {
            if cancellation.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            let raw = match self
                .fetch_window_with_retry(&job.exchange_id, &job.symbol, job.timeframe, window, cancellation)
                .await
            {
                Ok(raw) => raw,
                Err(RunError::Cancelled) => return Err(RunError::Cancelled),
                Err(e) => {
                    self.record_failure(job, now, e.as_last_error()).await?;
                    return Err(e);
                }
            };

            let normalized = normalize_and_dedupe(raw, job.timeframe, floor_now);
            if normalized.is_empty() {
                continue;
            }

            let new_candles: Vec<Candle> = normalized
                .into_iter()
                .map(|raw| Candle::from_raw(&job.exchange_id, &job.symbol, job.timeframe, raw, now))
                .collect();

            let recomputed = self
                .recompute_suffix(job, indicator_config, new_candles)
                .await?;

            if let Some(max_ot) = recomputed.iter().map(|c| c.open_time).max() {
                highest_open_time = Some(match highest_open_time {
                    Some(h) => h.max(max_ot),
                    None => max_ot,
                });
            }

            self.candles.upsert_batch(&recomputed).await?;
            total_upserted += recomputed.len() as u64;
        }

        if let Some(to) = highest_open_time
            && Some(to) != job.cursor.last_candle_time
        {
            let advanced = self
                .jobs
                .advance_cursor(job.job_id, job.cursor.last_candle_time, to)
                .await?;
            if !advanced {
                return Err(RunError::CursorRace);
            }
        }

        self.record_success(job, now).await?;

        info!(
            job_id = %job.job_id,
            candles_upserted = total_upserted,
            "job run completed"
        );

        Ok(RunSummary {
            candles_upserted: total_upserted,
            cursor_advanced_to: highest_open_time,
        })
    }

    /// Recomputes indicators for the suffix affected by a fetch window:
    /// all candles with `open_time >= t0 - warmup_window(config)`, where
    /// `t0` is the first newly fetched candle's `open_time`.
    async fn recompute_suffix(
        &self,
        job: &Job,
        indicator_config: &IndicatorConfig,
        new_candles: Vec<Candle>,
    ) -> Result<Vec<Candle>, RunError> {
        let Some(first_new) = new_candles.first() else {
            return Ok(new_candles);
        };

        let warmup_span = ChronoDuration::seconds(
            job.timeframe.to_seconds() * indicator_config.warmup_window() as i64,
        );
        let history_start = first_new.open_time - warmup_span;

        let mut history = self
            .candles
            .range(
                &job.exchange_id,
                &job.symbol,
                job.timeframe,
                Some(history_start),
                Some(first_new.open_time),
            )
            .await?;

        let new_len = new_candles.len();
        history.extend(new_candles);
        IndicatorEngine::compute(indicator_config, &mut history);

        Ok(history.split_off(history.len() - new_len))
    }

    async fn fetch_window_with_retry(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        window: FetchWindow,
        cancellation: &CancellationToken,
    ) -> Result<Vec<RawCandle>, RunError> {
        let mut attempt: u32 = 0;

        loop {
            if cancellation.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            self.rate_limiter.acquire_blocking(exchange_id, 1).await?;

            match self
                .gateway
                .fetch_candles(
                    exchange_id,
                    symbol,
                    timeframe,
                    window.since,
                    window.until,
                    self.config.default_fetch_limit,
                )
                .await
            {
                Ok(candles) => return Ok(candles),
                Err(err) => {
                    let is_unknown = matches!(err, GatewayError::Unknown(_));
                    match err {
                        GatewayError::Permanent(message) => {
                            return Err(RunError::Permanent(message));
                        }
                        GatewayError::Transient(message) | GatewayError::Unknown(message) => {
                            attempt += 1;
                            if attempt > self.config.max_transient_attempts {
                                return Err(if is_unknown {
                                    RunError::Permanent(message)
                                } else {
                                    RunError::Transient(message)
                                });
                            }
                            let backoff_ms = self
                                .config
                                .backoff_base_ms
                                .saturating_mul(1u64 << (attempt - 1))
                                .min(self.config.backoff_max_ms);
                            warn!(exchange_id, attempt, backoff_ms, "transient fetch failure, retrying");
                            tokio::time::sleep(StdDuration::from_millis(backoff_ms)).await;
                        }
                    }
                }
            }
        }
    }

    async fn record_success(&self, job: &Job, now: DateTime<Utc>) -> Result<(), RunError> {
        let next_run_time = schedule_next_run(job.timeframe, now);
        self.jobs
            .record_run(
                job.job_id,
                RunOutcome {
                    last_run_time: now,
                    next_run_time,
                    last_error: None,
                    runs_total: job.run_state.runs_total + 1,
                },
            )
            .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        job: &Job,
        now: DateTime<Utc>,
        message: String,
    ) -> Result<(), RunError> {
        let next_run_time = schedule_next_run(job.timeframe, now);
        self.jobs
            .record_run(
                job.job_id,
                RunOutcome {
                    last_run_time: now,
                    next_run_time,
                    last_error: Some(message),
                    runs_total: job.run_state.runs_total,
                },
            )
            .await?;
        Ok(())
    }
}

fn floor_to_grid(timeframe: Timeframe, at: DateTime<Utc>) -> DateTime<Utc> {
    let ms = timeframe.period_start(at.timestamp_millis());
    Utc.timestamp_millis_opt(ms).single().unwrap_or(at)
}

/// `next_run_time = floor(now, tf) + tf + jitter`, per the `"timeframe"`
/// schedule mode (§4.7). Jitter avoids thundering herds across jobs that
/// close on the same boundary.
fn schedule_next_run(timeframe: Timeframe, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = floor_to_grid(timeframe, now);
    let jitter_ms = rand::random::<u16>() as i64 % 2000;
    floor + ChronoDuration::seconds(timeframe.to_seconds()) + ChronoDuration::milliseconds(jitter_ms)
}

/// Aligns each candle's `open_time` to the grid, drops the currently-open
/// candle (`open_time == floor(now, tf)` or later), and deduplicates
/// within the batch by keeping one entry per `open_time`.
fn normalize_and_dedupe(
    raw: Vec<RawCandle>,
    timeframe: Timeframe,
    floor_now: DateTime<Utc>,
) -> Vec<RawCandle> {
    let mut by_open_time: BTreeMap<DateTime<Utc>, RawCandle> = BTreeMap::new();

    for mut candle in raw {
        let aligned_ms = timeframe.period_start(candle.open_time.timestamp_millis());
        candle.open_time = Utc.timestamp_millis_opt(aligned_ms).single().unwrap_or(candle.open_time);

        if candle.open_time >= floor_now {
            continue;
        }
        by_open_time.entry(candle.open_time).or_insert(candle);
    }

    by_open_time.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_in_progress_candle_and_dedupes() {
        let tf = Timeframe::OneHour;
        let floor_now = Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap();
        let raw = vec![
            RawCandle {
                open_time: Utc.with_ymd_and_hms(2026, 1, 18, 10, 0, 0).unwrap(),
                open: 1.into(),
                high: 1.into(),
                low: 1.into(),
                close: 1.into(),
                volume: 1.into(),
            },
            RawCandle {
                open_time: Utc.with_ymd_and_hms(2026, 1, 18, 10, 0, 0).unwrap(),
                open: 2.into(),
                high: 2.into(),
                low: 2.into(),
                close: 2.into(),
                volume: 2.into(),
            },
            RawCandle {
                open_time: Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap(),
                open: 3.into(),
                high: 3.into(),
                low: 3.into(),
                close: 3.into(),
                volume: 3.into(),
            },
        ];

        let normalized = normalize_and_dedupe(raw, tf, floor_now);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].open.to_string(), "1");
    }
}
