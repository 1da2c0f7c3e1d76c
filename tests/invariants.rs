//! Universal invariants (spec §8) exercised directly against the in-memory
//! repository doubles, independent of the JobRunner wiring in
//! `scenarios.rs`.

use std::sync::Arc;
use std::time::Duration;

use candleward::application::job_lock::JobLock;
use candleward::application::rate_limiter::RateLimiter;
use candleward::domain::clock::test_support::FakeClock;
use candleward::domain::clock::Clock;
use candleward::domain::connector::{AcquireOutcome, Connector, RateLimitState};
use candleward::domain::job::Job;
use candleward::domain::market::timeframe::Timeframe;
use candleward::domain::repositories::{ConnectorRepository, JobRepository};
use candleward::infrastructure::mock::{InMemoryConnectorRepository, InMemoryJobRepository};
use chrono::Utc;

/// Invariant 1: for any interleaving, no two successful acquires exceed the
/// connector's bucket, and denial always carries a usable `wait_hint_ms`.
#[tokio::test]
async fn rate_limit_never_grants_past_the_bucket_limit() {
    let now = Utc::now();
    let clock = Arc::new(FakeClock::new(now));
    let repo: Arc<InMemoryConnectorRepository> = Arc::new(InMemoryConnectorRepository::new());

    let connector = Connector::new("binance", RateLimitState::new(2, 60_000, 0, now));
    repo.upsert(&connector).await.unwrap();

    let limiter = RateLimiter::new(
        repo.clone() as Arc<dyn ConnectorRepository>,
        clock.clone() as Arc<dyn Clock>,
    );

    let mut granted = 0;
    let mut last_denied_wait_hint = None;
    for _ in 0..5 {
        match limiter.acquire("binance", 1).await.unwrap() {
            AcquireOutcome::Granted => granted += 1,
            AcquireOutcome::Denied { wait_hint_ms } => last_denied_wait_hint = Some(wait_hint_ms),
        }
    }

    assert_eq!(granted, 2, "limit=2 bucket must never grant a third call within the period");
    assert!(last_denied_wait_hint.is_some());
}

/// Invariant 1 (min-delay half): two calls closer than `min_delay_ms` apart
/// must not both be granted, even with bucket headroom remaining.
#[tokio::test]
async fn rate_limit_enforces_minimum_inter_call_delay() {
    let now = Utc::now();
    let clock = Arc::new(FakeClock::new(now));
    let repo: Arc<InMemoryConnectorRepository> = Arc::new(InMemoryConnectorRepository::new());

    let connector = Connector::new("binance", RateLimitState::new(100, 60_000, 500, now));
    repo.upsert(&connector).await.unwrap();

    let limiter = RateLimiter::new(
        repo.clone() as Arc<dyn ConnectorRepository>,
        clock.clone() as Arc<dyn Clock>,
    );

    let first = limiter.acquire("binance", 1).await.unwrap();
    assert_eq!(first, AcquireOutcome::Granted);

    // Only 100ms later: within the bucket, but inside the 500ms min delay.
    clock.advance(chrono::Duration::milliseconds(100));
    let second = limiter.acquire("binance", 1).await.unwrap();
    assert!(
        matches!(second, AcquireOutcome::Denied { .. }),
        "a call 100ms after the last one must be denied under a 500ms min delay"
    );
}

/// Invariant 2: at most one JobRunner attempt may hold a job's lease at a
/// time, for any interleaving of acquire calls.
#[tokio::test]
async fn at_most_one_lease_holder_per_job() {
    let now = Utc::now();
    let clock = Arc::new(FakeClock::new(now));
    let repo: Arc<InMemoryJobRepository> = Arc::new(InMemoryJobRepository::new());

    let job = Job::new("binance", "BTCUSDT", Timeframe::OneHour, now);
    let job_id = job.job_id;
    repo.upsert(&job).await.unwrap();

    let lock = JobLock::new(
        repo.clone() as Arc<dyn JobRepository>,
        clock.clone() as Arc<dyn Clock>,
    );

    let mut holders = 0;
    let mut guards = Vec::new();
    for _ in 0..4 {
        if let Some(guard) = lock.acquire(job_id, Duration::from_secs(30)).await.unwrap() {
            holders += 1;
            guards.push(guard);
        }
    }

    assert_eq!(holders, 1, "only the first of N racing acquires may hold the lease");
}
