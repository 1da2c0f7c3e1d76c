use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use candleward::application::cancellation::CancellationSource;
use candleward::application::job_lock::JobLock;
use candleward::application::job_runner::{JobRunner, JobRunnerConfig};
use candleward::application::rate_limiter::RateLimiter;
use candleward::application::scheduler::{Scheduler, SchedulerConfig};
use candleward::config::AppConfig;
use candleward::domain::clock::SystemClock;
use candleward::domain::indicators::IndicatorConfig;
use candleward::infrastructure::exchange::BinanceGateway;
use candleward::infrastructure::persistence::{
    Database, SqliteCandleRepository, SqliteConnectorRepository, SqliteJobRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("candleward=info".parse().unwrap()),
        )
        .with(fmt::layer().with_target(false))
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!(database_url = %config.database_url, "starting candleward");

    let database = Database::new(&config.database_url).await?;

    let connectors = Arc::new(SqliteConnectorRepository::new(database.pool.clone()));
    let jobs = Arc::new(SqliteJobRepository::new(database.pool.clone()));
    let candles = Arc::new(SqliteCandleRepository::new(database.pool.clone()));

    let gateway = Arc::new(BinanceGateway::new(config.binance_base_url.clone()));

    let clock = Arc::new(SystemClock);

    let rate_limiter = Arc::new(RateLimiter::new(connectors.clone(), clock.clone()));
    let job_lock = Arc::new(JobLock::new(jobs.clone(), clock.clone()));

    let runner_config = JobRunnerConfig {
        lock_ttl: Duration::from_secs(config.fetch_timeout_secs * config.lock_ttl_multiplier),
        default_fetch_limit: config.default_fetch_limit,
        ..JobRunnerConfig::default()
    };

    let runner = Arc::new(JobRunner::new(
        jobs.clone(),
        candles.clone(),
        gateway.clone(),
        rate_limiter.clone(),
        job_lock.clone(),
        clock.clone(),
        runner_config,
    ));

    let scheduler_config = SchedulerConfig {
        tick_interval: Duration::from_millis(config.tick_interval_ms),
        worker_pool_size: config.worker_pool_size,
        drain_deadline: Duration::from_secs(config.shutdown_drain_secs),
        ..SchedulerConfig::default()
    };

    let scheduler = Scheduler::new(
        jobs.clone(),
        runner.clone(),
        clock.clone(),
        scheduler_config,
        IndicatorConfig::default(),
    );

    let (shutdown_source, shutdown_token) = CancellationSource::new();

    let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_token).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining workers");
    shutdown_source.request();

    scheduler_handle.await?;

    tracing::info!("candleward stopped");
    Ok(())
}
