//! S4 (gap fill) and S5 (backfill bound) end-to-end scenarios.

use std::sync::Arc;

use candleward::application::backfill_driver::BackfillDriver;
use candleward::application::cancellation::CancellationSource;
use candleward::application::gapfill_driver::GapFillDriver;
use candleward::application::job_lock::JobLock;
use candleward::application::job_runner::{JobRunner, JobRunnerConfig};
use candleward::application::quality_analyzer::QualityAnalyzer;
use candleward::application::rate_limiter::RateLimiter;
use candleward::domain::clock::test_support::FakeClock;
use candleward::domain::clock::Clock;
use candleward::domain::connector::{Connector, RateLimitState};
use candleward::domain::indicators::IndicatorConfig;
use candleward::domain::job::Job;
use candleward::domain::market::candle::{Candle, RawCandle};
use candleward::domain::market::timeframe::Timeframe;
use candleward::domain::repositories::{CandleRepository, ConnectorRepository, JobRepository};
use candleward::domain::tasks::TaskStatus;
use candleward::infrastructure::mock::{
    InMemoryCandleRepository, InMemoryConnectorRepository, InMemoryJobRepository,
    InMemoryQualityRepository, MockExchangeGateway,
};
use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;

fn raw_at(year: i32, month: u32, day: u32, hour: u32) -> RawCandle {
    RawCandle {
        open_time: Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap(),
        open: dec!(100),
        high: dec!(101),
        low: dec!(99),
        close: dec!(100.5),
        volume: dec!(10),
    }
}

fn stored_candle(open_time: chrono::DateTime<Utc>) -> Candle {
    Candle::from_raw(
        "binance",
        "BTCUSDT",
        Timeframe::OneHour,
        RawCandle {
            open_time,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(10),
        },
        open_time,
    )
}

#[tokio::test]
async fn s4_gap_fill_closes_a_known_gap() {
    let now = Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap();
    let clock = Arc::new(FakeClock::new(now));

    let jobs: Arc<InMemoryJobRepository> = Arc::new(InMemoryJobRepository::new());
    let candles: Arc<InMemoryCandleRepository> = Arc::new(InMemoryCandleRepository::new());
    let quality: Arc<InMemoryQualityRepository> = Arc::new(InMemoryQualityRepository::new());
    let connectors: Arc<InMemoryConnectorRepository> = Arc::new(InMemoryConnectorRepository::new());
    let gateway = Arc::new(MockExchangeGateway::new());

    connectors
        .upsert(&Connector::new("binance", RateLimitState::new(1000, 60_000, 0, now)))
        .await
        .unwrap();

    // Stored candles at 00:00 and 04:00, leaving a gap [00:00, 04:00) of 3.
    candles
        .upsert_batch(&[
            stored_candle(Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap()),
            stored_candle(Utc.with_ymd_and_hms(2026, 1, 15, 4, 0, 0).unwrap()),
        ])
        .await
        .unwrap();

    let mut job = Job::new("binance", "BTCUSDT", Timeframe::OneHour, now);
    job.cursor.last_candle_time = Some(Utc.with_ymd_and_hms(2026, 1, 15, 4, 0, 0).unwrap());
    let job_id = job.job_id;
    jobs.upsert(&job).await.unwrap();

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
    let analyzer = Arc::new(QualityAnalyzer::new(
        candles.clone() as Arc<dyn CandleRepository>,
        quality.clone() as Arc<dyn candleward::domain::repositories::QualityRepository>,
        clock.clone() as Arc<dyn Clock>,
    ));

    let before = analyzer.analyze("binance", "BTCUSDT", Timeframe::OneHour).await.unwrap();
    assert_eq!(before.gaps.len(), 1);

    let gaps = before.gaps.clone();
    gateway.push_response(Ok(vec![
        raw_at(2026, 1, 15, 1),
        raw_at(2026, 1, 15, 2),
        raw_at(2026, 1, 15, 3),
    ]));

    let driver = GapFillDriver::new(runner.clone(), analyzer.clone(), clock.clone() as Arc<dyn Clock>);
    let (_source, cancellation) = CancellationSource::new();

    let task = driver
        .run(
            job_id,
            "binance",
            "BTCUSDT",
            Timeframe::OneHour,
            &gaps,
            &IndicatorConfig::default(),
            &cancellation,
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.gaps_filled, 1);
    assert_eq!(task.candles_fetched, 3);

    let after = analyzer.analyze("binance", "BTCUSDT", Timeframe::OneHour).await.unwrap();
    assert_eq!(after.gaps.len(), 0, "gap must be fully closed after the fill");
    assert_eq!(after.total, 5);
}

#[tokio::test]
async fn s5_backfill_stops_when_exchange_runs_dry() {
    let now = Utc.with_ymd_and_hms(2026, 7, 18, 0, 0, 0).unwrap();
    let clock = Arc::new(FakeClock::new(now));

    let jobs: Arc<InMemoryJobRepository> = Arc::new(InMemoryJobRepository::new());
    let candles: Arc<InMemoryCandleRepository> = Arc::new(InMemoryCandleRepository::new());
    let connectors: Arc<InMemoryConnectorRepository> = Arc::new(InMemoryConnectorRepository::new());
    let gateway = Arc::new(MockExchangeGateway::new());

    connectors
        .upsert(&Connector::new("binance", RateLimitState::new(1000, 60_000, 0, now)))
        .await
        .unwrap();

    // The exchange only has six months of history: a single non-empty
    // batch near `now`, then an empty batch for anything older.
    let six_months_ago = now - chrono::Duration::days(180);
    candles
        .upsert_batch(&[stored_candle(six_months_ago)])
        .await
        .unwrap();

    let job = Job::new("binance", "BTCUSDT", Timeframe::OneDay, now);
    let job_id = job.job_id;
    jobs.upsert(&job).await.unwrap();

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

    // Exchange returns an empty batch for every request beyond six months back.
    gateway.push_response(Ok(Vec::new()));

    let driver = BackfillDriver::new(
        jobs.clone() as Arc<dyn JobRepository>,
        candles.clone() as Arc<dyn CandleRepository>,
        runner.clone(),
        clock.clone() as Arc<dyn Clock>,
        500,
    );
    let (_source, cancellation) = CancellationSource::new();

    let task = driver
        .run(job_id, 12, &IndicatorConfig::default(), &cancellation)
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        task.target_start_date,
        now - chrono::Duration::days(12 * 30),
        "target_start_date reflects the operator's 12-month request even though the exchange can't serve it"
    );
    assert_eq!(task.candles_fetched, 0, "the only batch attempted came back empty");
}
