use std::sync::Arc;

use uuid::Uuid;

use crate::domain::clock::Clock;
use crate::domain::errors::RunError;
use crate::domain::indicators::IndicatorConfig;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::quality::Gap;
use crate::domain::tasks::{FetchIntent, GapFillTask, TaskStatus};

use super::cancellation::CancellationToken;
use super::job_runner::JobRunner;
use super::quality_analyzer::QualityAnalyzer;

/// Drives the GapFillTask state machine (§4.9): for each gap, submits a
/// synthetic run via JobRunner under the `GapFill(range)` intent, then
/// re-scans quality to decide whether the gap is now filled.
pub struct GapFillDriver {
    runner: Arc<JobRunner>,
    analyzer: Arc<QualityAnalyzer>,
    clock: Arc<dyn Clock>,
}

impl GapFillDriver {
    pub fn new(runner: Arc<JobRunner>, analyzer: Arc<QualityAnalyzer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner,
            analyzer,
            clock,
        }
    }

    pub async fn run(
        &self,
        job_id: Uuid,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        gaps: &[Gap],
        indicator_config: &IndicatorConfig,
        cancellation: &CancellationToken,
    ) -> Result<GapFillTask, RunError> {
        let mut task = GapFillTask::new(job_id, gaps.len());
        task.status = TaskStatus::Running;
        task.started_at = Some(self.clock.now());

        for gap in gaps {
            if cancellation.is_cancelled() {
                task.status = TaskStatus::Failed;
                task.errors.push("cancelled".to_string());
                return Ok(task);
            }

            task.gaps_attempted += 1;

            let outcome = self
                .runner
                .run_once(
                    job_id,
                    FetchIntent::GapFill {
                        range_start: gap.start,
                        range_end: gap.end,
                    },
                    indicator_config,
                    cancellation,
                )
                .await;

            match outcome {
                Ok(summary) => {
                    task.candles_fetched += summary.candles_upserted;
                }
                Err(e) => {
                    task.errors.push(format!("{gap:?}: {}", e.as_last_error()));
                    continue;
                }
            }

            // A gap is marked filled iff a post-fetch quality re-scan
            // shows it no longer present.
            let record = self.analyzer.analyze(exchange_id, symbol, timeframe).await;
            let still_present = match record {
                Ok(r) => r.gaps.iter().any(|g| g.start == gap.start && g.end == gap.end),
                Err(e) => {
                    task.errors.push(format!("{gap:?}: quality re-scan failed: {e}"));
                    true
                }
            };

            if !still_present {
                task.gaps_filled += 1;
            } else {
                task.errors.push(format!("{gap:?}: residual gap remains after fetch"));
            }
        }

        task.status = TaskStatus::Completed;
        task.completed_at = Some(self.clock.now());
        Ok(task)
    }
}
