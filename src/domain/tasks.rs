use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `{pending -> running -> (completed | failed)}`, shared by Backfill,
/// GapFill and QualityCheck tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Read-only snapshot consumers pull at any frequency; no push protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: TaskStatus,
    pub progress: u8,
    pub current_item: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapFillTask {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub status: TaskStatus,
    pub total_gaps: usize,
    pub gaps_attempted: usize,
    pub gaps_filled: usize,
    pub candles_fetched: u64,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GapFillTask {
    pub fn new(job_id: Uuid, total_gaps: usize) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            job_id,
            status: TaskStatus::Pending,
            total_gaps,
            gaps_attempted: 0,
            gaps_filled: 0,
            candles_fetched: 0,
            errors: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn progress(&self) -> u8 {
        if self.total_gaps == 0 {
            return 100;
        }
        ((self.gaps_attempted as f64 / self.total_gaps as f64) * 100.0) as u8
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status,
            progress: self.progress(),
            current_item: None,
            errors: self.errors.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillTask {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub status: TaskStatus,
    pub target_start_date: DateTime<Utc>,
    pub batches_fetched: u64,
    pub candles_fetched: u64,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackfillTask {
    pub fn new(job_id: Uuid, target_start_date: DateTime<Utc>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            job_id,
            status: TaskStatus::Pending,
            target_start_date,
            batches_fetched: 0,
            candles_fetched: 0,
            errors: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let progress = match self.status {
            TaskStatus::Completed | TaskStatus::Failed => 100,
            TaskStatus::Pending => 0,
            TaskStatus::Running => 50,
        };
        ProgressSnapshot {
            status: self.status,
            progress,
            current_item: None,
            errors: self.errors.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckTask {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub jobs_total: usize,
    pub jobs_checked: usize,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QualityCheckTask {
    pub fn new(jobs_total: usize) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            status: TaskStatus::Pending,
            jobs_total,
            jobs_checked: 0,
            errors: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let progress = if self.jobs_total == 0 {
            100
        } else {
            ((self.jobs_checked as f64 / self.jobs_total as f64) * 100.0) as u8
        };
        ProgressSnapshot {
            status: self.status,
            progress,
            current_item: None,
            errors: self.errors.clone(),
        }
    }
}

/// Intent a `FetchPlanner` plans windows for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchIntent {
    Live,
    Backfill,
    GapFill {
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    },
}
