use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use std::str::FromStr;

use crate::domain::clock::Clock;
use crate::domain::indicators::IndicatorConfig;
use crate::domain::job::Job;
use crate::domain::repositories::JobRepository;
use crate::domain::tasks::FetchIntent;

use super::cancellation::{CancellationSource, CancellationToken};
use super::job_runner::JobRunner;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: StdDuration,
    pub worker_pool_size: usize,
    pub max_in_flight_per_connector: usize,
    pub drain_deadline: StdDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: StdDuration::from_secs(1),
            worker_pool_size: 4,
            max_in_flight_per_connector: 1,
            drain_deadline: StdDuration::from_secs(30),
        }
    }
}

/// Single-threaded driver loop: every `tick_interval`, pick due jobs and
/// dispatch to a bounded worker pool, respecting a per-connector
/// in-flight cap (§4.7). The Scheduler itself does no I/O besides the
/// periodic job query.
pub struct Scheduler {
    jobs: Arc<dyn JobRepository>,
    runner: Arc<JobRunner>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    worker_permits: Arc<Semaphore>,
    default_indicator_config: IndicatorConfig,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        runner: Arc<JobRunner>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
        default_indicator_config: IndicatorConfig,
    ) -> Self {
        let worker_permits = Arc::new(Semaphore::new(config.worker_pool_size));
        Self {
            jobs,
            runner,
            clock,
            config,
            worker_permits,
            default_indicator_config,
        }
    }

    /// Runs the tick loop until `shutdown.cancelled()` resolves, then
    /// drains in-flight workers up to `drain_deadline` before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.tick_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    self.tick(&shutdown).await;
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }

        info!("scheduler shutting down, draining in-flight workers");
        let _ = tokio::time::timeout(self.config.drain_deadline, async {
            let _ = self
                .worker_permits
                .acquire_many(self.config.worker_pool_size as u32)
                .await;
        })
        .await;
    }

    async fn tick(&self, shutdown: &CancellationToken) {
        let now = self.clock.now();
        let candidates = match self.jobs.due_jobs(now).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "failed to query due jobs");
                return;
            }
        };

        let mut in_flight_by_connector: HashMap<String, usize> = HashMap::new();

        for job in candidates {
            let count = in_flight_by_connector.entry(job.exchange_id.clone()).or_insert(0);
            if *count >= self.config.max_in_flight_per_connector {
                debug!(exchange_id = %job.exchange_id, "connector in-flight cap reached, skipping this tick");
                continue;
            }

            let Ok(permit) = self.worker_permits.clone().try_acquire_owned() else {
                debug!("worker pool full, skipping remaining candidates this tick");
                break;
            };

            *count += 1;
            self.dispatch(job, permit, shutdown.clone());
        }
    }

    fn dispatch(
        &self,
        job: Job,
        permit: tokio::sync::OwnedSemaphorePermit,
        cancellation: CancellationToken,
    ) {
        let runner = self.runner.clone();
        let job_id = job.job_id;
        let indicator_config = match &job.indicator_config_override {
            Some(s) => match IndicatorConfig::from_str(s) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(%job_id, error = %e, "invalid indicator_config_override, falling back to default");
                    self.default_indicator_config.clone()
                }
            },
            None => self.default_indicator_config.clone(),
        };

        tokio::spawn(async move {
            let _permit = permit;
            match runner
                .run_once(job_id, FetchIntent::Live, &indicator_config, &cancellation)
                .await
            {
                Ok(summary) => {
                    debug!(%job_id, candles = summary.candles_upserted, "run complete");
                }
                Err(e) if e.records_last_error() => {
                    warn!(%job_id, error = %e, "run failed");
                }
                Err(e) => {
                    debug!(%job_id, reason = %e, "run skipped");
                }
            }
        });
    }
}

/// Convenience for callers that need a fresh shutdown signal paired with
/// the `Scheduler::run` token.
pub fn new_shutdown_signal() -> (CancellationSource, CancellationToken) {
    CancellationSource::new()
}
