use std::sync::Arc;

use uuid::Uuid;

use crate::domain::clock::Clock;
use crate::domain::errors::RunError;
use crate::domain::indicators::IndicatorConfig;
use crate::domain::planner::FetchPlanner;
use crate::domain::repositories::{CandleRepository, JobRepository};
use crate::domain::tasks::{BackfillTask, FetchIntent, TaskStatus};

use super::cancellation::CancellationToken;
use super::job_runner::JobRunner;

/// Drives the historical-backfill state machine for a job (§4.9). Windows
/// march backward from the oldest stored candle toward `target_start_date`
/// in `limit`-sized chunks; the driver stops when either the target is
/// reached or the exchange returns an empty batch.
pub struct BackfillDriver {
    jobs: Arc<dyn JobRepository>,
    candles: Arc<dyn CandleRepository>,
    runner: Arc<JobRunner>,
    clock: Arc<dyn Clock>,
    default_fetch_limit: u32,
}

impl BackfillDriver {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        candles: Arc<dyn CandleRepository>,
        runner: Arc<JobRunner>,
        clock: Arc<dyn Clock>,
        default_fetch_limit: u32,
    ) -> Self {
        Self {
            jobs,
            candles,
            runner,
            clock,
            default_fetch_limit,
        }
    }

    pub async fn run(
        &self,
        job_id: Uuid,
        months_back: i64,
        indicator_config: &IndicatorConfig,
        cancellation: &CancellationToken,
    ) -> Result<BackfillTask, RunError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| RunError::Integrity(format!("job {job_id} not found")))?;

        let now = self.clock.now();
        let target = now - chrono::Duration::days(months_back * 30);
        let mut task = BackfillTask::new(job_id, target);
        task.status = TaskStatus::Running;
        task.started_at = Some(now);

        let planner = FetchPlanner::new(job.timeframe, self.default_fetch_limit);

        loop {
            if cancellation.is_cancelled() {
                task.status = TaskStatus::Failed;
                task.errors.push("cancelled".to_string());
                return Ok(task);
            }

            let oldest = self
                .candles
                .earliest(&job.exchange_id, &job.symbol, job.timeframe)
                .await?
                .map(|c| c.open_time)
                .unwrap_or(now);

            let Some(window) = planner.plan_backfill_step(oldest, target) else {
                break;
            };

            match self
                .runner
                .run_once(
                    job_id,
                    FetchIntent::GapFill {
                        range_start: window.since,
                        range_end: window.until,
                    },
                    indicator_config,
                    cancellation,
                )
                .await
            {
                Ok(summary) => {
                    task.batches_fetched += 1;
                    task.candles_fetched += summary.candles_upserted;
                    if summary.candles_upserted == 0 {
                        // Exchange returned an empty batch: implicit
                        // earliest-available bound reached.
                        break;
                    }
                }
                Err(RunError::Cancelled) => {
                    task.status = TaskStatus::Failed;
                    task.errors.push("cancelled".to_string());
                    return Ok(task);
                }
                Err(e) => {
                    task.errors.push(e.as_last_error());
                    break;
                }
            }
        }

        task.status = TaskStatus::Completed;
        task.completed_at = Some(self.clock.now());
        Ok(task)
    }
}
