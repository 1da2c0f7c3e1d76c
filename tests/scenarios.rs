//! End-to-end scenarios against in-memory test doubles: S1 (delta fetch),
//! S3 (crash mid-run recovery), S6 (permanent gateway error).

use std::sync::Arc;
use std::time::Duration;

use candleward::application::cancellation::{CancellationSource, CancellationToken};
use candleward::application::job_lock::JobLock;
use candleward::application::job_runner::{JobRunner, JobRunnerConfig};
use candleward::application::rate_limiter::RateLimiter;
use candleward::domain::clock::test_support::FakeClock;
use candleward::domain::clock::Clock;
use candleward::domain::connector::{Connector, RateLimitState};
use candleward::domain::errors::{GatewayError, RunError};
use candleward::domain::indicators::IndicatorConfig;
use candleward::domain::job::{Job, JobStatus};
use candleward::domain::market::candle::RawCandle;
use candleward::domain::market::timeframe::Timeframe;
use candleward::domain::repositories::{CandleRepository, ConnectorRepository, JobRepository};
use candleward::domain::tasks::FetchIntent;
use candleward::infrastructure::mock::{
    InMemoryCandleRepository, InMemoryConnectorRepository, InMemoryJobRepository,
    MockExchangeGateway,
};
use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;

fn raw(hour: u32) -> RawCandle {
    RawCandle {
        open_time: Utc.with_ymd_and_hms(2026, 1, 18, hour, 0, 0).unwrap(),
        open: dec!(100),
        high: dec!(101),
        low: dec!(99),
        close: dec!(100.5),
        volume: dec!(10),
    }
}

fn no_cancel() -> CancellationToken {
    CancellationSource::new().1
}

struct Harness {
    jobs: Arc<InMemoryJobRepository>,
    candles: Arc<InMemoryCandleRepository>,
    gateway: Arc<MockExchangeGateway>,
    runner: Arc<JobRunner>,
    clock: Arc<FakeClock>,
}

fn build_harness(now: chrono::DateTime<Utc>) -> Harness {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let candles = Arc::new(InMemoryCandleRepository::new());
    let connectors = Arc::new(InMemoryConnectorRepository::new());
    let gateway = Arc::new(MockExchangeGateway::new());
    let clock = Arc::new(FakeClock::new(now));

    let connector = Connector::new("binance", RateLimitState::new(1000, 60_000, 0, now));
    futures::executor::block_on(connectors.upsert(&connector)).unwrap();

    let rate_limiter = Arc::new(RateLimiter::new(
        connectors.clone() as Arc<dyn ConnectorRepository>,
        clock.clone() as Arc<dyn Clock>,
    ));
    let job_lock = Arc::new(JobLock::new(
        jobs.clone() as Arc<dyn JobRepository>,
        clock.clone() as Arc<dyn Clock>,
    ));

    let runner = Arc::new(JobRunner::new(
        jobs.clone() as Arc<dyn JobRepository>,
        candles.clone() as Arc<dyn CandleRepository>,
        gateway.clone() as Arc<dyn candleward::domain::ports::ExchangeGateway>,
        rate_limiter,
        job_lock,
        clock.clone() as Arc<dyn Clock>,
        JobRunnerConfig::default(),
    ));

    Harness {
        jobs,
        candles,
        gateway,
        runner,
        clock,
    }
}

#[tokio::test]
async fn s1_delta_fetch_happy_path() {
    let now = Utc.with_ymd_and_hms(2026, 1, 18, 12, 30, 0).unwrap();
    let h = build_harness(now);

    let mut job = Job::new("binance", "BTCUSDT", Timeframe::OneHour, now);
    job.cursor.last_candle_time = Some(Utc.with_ymd_and_hms(2026, 1, 18, 9, 0, 0).unwrap());
    let job_id = job.job_id;
    h.jobs.upsert(&job).await.unwrap();

    h.gateway
        .push_response(Ok(vec![raw(10), raw(11), raw(12)]));

    let cancellation = no_cancel();
    let summary = h
        .runner
        .run_once(job_id, FetchIntent::Live, &IndicatorConfig::default(), &cancellation)
        .await
        .unwrap();

    assert_eq!(summary.candles_upserted, 3);
    assert_eq!(
        summary.cursor_advanced_to,
        Some(Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap())
    );

    let stored = h.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(
        stored.cursor.last_candle_time,
        Some(Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap())
    );
    assert_eq!(stored.run_state.runs_total, 1);
    assert!(stored.run_state.last_error.is_none());
    assert!(stored.run_state.next_run_time > now);
}

#[tokio::test]
async fn s3_crash_mid_run_is_idempotent_on_retry() {
    let now = Utc.with_ymd_and_hms(2026, 1, 18, 12, 30, 0).unwrap();
    let h = build_harness(now);

    let mut job = Job::new("binance", "BTCUSDT", Timeframe::OneHour, now);
    job.cursor.last_candle_time = Some(Utc.with_ymd_and_hms(2026, 1, 18, 9, 0, 0).unwrap());
    let job_id = job.job_id;
    h.jobs.upsert(&job).await.unwrap();

    // Simulate a crashed attempt: candles already landed (upsert happened)
    // but the cursor was never advanced and the lease was never released.
    let crashed_candles: Vec<_> = vec![raw(10), raw(11), raw(12)]
        .into_iter()
        .map(|r| {
            candleward::domain::market::candle::Candle::from_raw(
                "binance", "BTCUSDT", Timeframe::OneHour, r, now,
            )
        })
        .collect();
    h.candles.upsert_batch(&crashed_candles).await.unwrap();

    let stale_nonce = uuid::Uuid::new_v4();
    h.jobs
        .try_acquire_lock(job_id, stale_nonce, Duration::from_millis(1), now - chrono::Duration::seconds(5))
        .await
        .unwrap();

    // Advance the fake clock past the stale lease's expiry.
    h.clock.set(now + chrono::Duration::seconds(1));

    h.gateway
        .push_response(Ok(vec![raw(10), raw(11), raw(12)]));

    let cancellation = no_cancel();
    let summary = h
        .runner
        .run_once(job_id, FetchIntent::Live, &IndicatorConfig::default(), &cancellation)
        .await
        .unwrap();

    assert_eq!(summary.candles_upserted, 3, "re-fetch upserts the same candles, no duplicates");

    let count = h
        .candles
        .count("binance", "BTCUSDT", Timeframe::OneHour)
        .await
        .unwrap();
    assert_eq!(count, 3, "no duplicate rows after the crashed + recovered run");

    let stored = h.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.run_state.runs_total, 1, "the crashed attempt never recorded a run");
}

#[tokio::test]
async fn s6_permanent_gateway_error_leaves_job_active_with_no_cursor_change() {
    let now = Utc.with_ymd_and_hms(2026, 1, 18, 12, 30, 0).unwrap();
    let h = build_harness(now);

    let cursor_before = Utc.with_ymd_and_hms(2026, 1, 18, 9, 0, 0).unwrap();
    let mut job = Job::new("binance", "BTCUSDT", Timeframe::OneHour, now);
    job.cursor.last_candle_time = Some(cursor_before);
    let job_id = job.job_id;
    h.jobs.upsert(&job).await.unwrap();

    h.gateway
        .push_response(Err(GatewayError::Permanent("unknown symbol".to_string())));

    let cancellation = no_cancel();
    let result = h
        .runner
        .run_once(job_id, FetchIntent::Live, &IndicatorConfig::default(), &cancellation)
        .await;

    assert!(matches!(result, Err(RunError::Permanent(_))));

    let stored = h.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Active, "permanent fetch errors never fail the job");
    assert_eq!(stored.cursor.last_candle_time, Some(cursor_before));
    assert!(stored.run_state.next_run_time > now, "next run still advances on normal cadence");
    assert!(stored.run_state.last_error.is_some());

    let count = h
        .candles
        .count("binance", "BTCUSDT", Timeframe::OneHour)
        .await
        .unwrap();
    assert_eq!(count, 0, "no candles written on a permanent error");
}
