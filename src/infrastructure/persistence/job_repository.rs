use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::RepositoryError;
use crate::domain::job::{Cursor, Job, JobLockState, JobStatus, RunState};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::repositories::{JobRepository, RunOutcome};

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Connection(e.to_string())
}

fn status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Active => "active",
        JobStatus::Paused => "paused",
        JobStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> JobStatus {
    match s {
        "paused" => JobStatus::Paused,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Active,
    }
}

fn row_to_job(r: &sqlx::sqlite::SqliteRow) -> Result<Job, RepositoryError> {
    let job_id: String = r.get("job_id");
    let job_id = Uuid::parse_str(&job_id).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    let timeframe: String = r.get("timeframe");
    let timeframe =
        Timeframe::from_str(&timeframe).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    let owner_nonce: Option<String> = r.get("owner_nonce");
    let owner_nonce = owner_nonce
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    Ok(Job {
        job_id,
        exchange_id: r.get("exchange_id"),
        symbol: r.get("symbol"),
        timeframe,
        status: status_from_str(r.get("status")),
        cursor: Cursor {
            last_candle_time: r.get("last_candle_time"),
        },
        lock: JobLockState {
            locked_until: r.get("locked_until"),
            owner_nonce,
        },
        run_state: RunState {
            last_run_time: r.get("last_run_time"),
            next_run_time: r.get("next_run_time"),
            last_error: r.get("last_error"),
            runs_total: {
                let n: i64 = r.get("runs_total");
                n as u64
            },
        },
        indicator_config_override: r.get("indicator_config_override"),
    })
}

const SELECT_COLUMNS: &str = "job_id, exchange_id, symbol, timeframe, status, last_candle_time, \
     locked_until, owner_nonce, last_run_time, next_run_time, last_error, runs_total, \
     indicator_config_override";

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE job_id = ?1"))
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn get_by_key(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE exchange_id = ?1 AND symbol = ?2 AND timeframe = ?3"
        ))
        .bind(exchange_id)
        .bind(symbol)
        .bind(timeframe.label())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn upsert(&self, job: &Job) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO jobs
                (job_id, exchange_id, symbol, timeframe, status, last_candle_time,
                 locked_until, owner_nonce, last_run_time, next_run_time, last_error,
                 runs_total, indicator_config_override)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(job_id) DO UPDATE SET
                exchange_id = excluded.exchange_id,
                symbol = excluded.symbol,
                timeframe = excluded.timeframe,
                status = excluded.status,
                last_candle_time = excluded.last_candle_time,
                locked_until = excluded.locked_until,
                owner_nonce = excluded.owner_nonce,
                last_run_time = excluded.last_run_time,
                next_run_time = excluded.next_run_time,
                last_error = excluded.last_error,
                runs_total = excluded.runs_total,
                indicator_config_override = excluded.indicator_config_override
            "#,
        )
        .bind(job.job_id.to_string())
        .bind(&job.exchange_id)
        .bind(&job.symbol)
        .bind(job.timeframe.label())
        .bind(status_to_str(job.status))
        .bind(job.cursor.last_candle_time)
        .bind(job.lock.locked_until)
        .bind(job.lock.owner_nonce.map(|n| n.to_string()))
        .bind(job.run_state.last_run_time)
        .bind(job.run_state.next_run_time)
        .bind(&job.run_state.last_error)
        .bind(job.run_state.runs_total as i64)
        .bind(&job.indicator_config_override)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM jobs"))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE status = 'active' AND next_run_time <= ?1 \
             ORDER BY next_run_time ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn try_acquire_lock(
        &self,
        job_id: Uuid,
        nonce: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let until = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

        let result = sqlx::query(
            "UPDATE jobs SET locked_until = ?1, owner_nonce = ?2 \
             WHERE job_id = ?3 AND (locked_until IS NULL OR locked_until <= ?4)",
        )
        .bind(until)
        .bind(nonce.to_string())
        .bind(job_id.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lock(&self, job_id: Uuid, nonce: Uuid) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE jobs SET locked_until = NULL, owner_nonce = NULL \
             WHERE job_id = ?1 AND owner_nonce = ?2",
        )
        .bind(job_id.to_string())
        .bind(nonce.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn heartbeat_lock(
        &self,
        job_id: Uuid,
        nonce: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let until = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

        let result = sqlx::query(
            "UPDATE jobs SET locked_until = ?1 WHERE job_id = ?2 AND owner_nonce = ?3",
        )
        .bind(until)
        .bind(job_id.to_string())
        .bind(nonce.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn advance_cursor(
        &self,
        job_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = match from {
            Some(from) => {
                sqlx::query(
                    "UPDATE jobs SET last_candle_time = ?1 \
                     WHERE job_id = ?2 AND last_candle_time = ?3",
                )
                .bind(to)
                .bind(job_id.to_string())
                .bind(from)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "UPDATE jobs SET last_candle_time = ?1 \
                     WHERE job_id = ?2 AND last_candle_time IS NULL",
                )
                .bind(to)
                .bind(job_id.to_string())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_run(&self, job_id: Uuid, outcome: RunOutcome) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE jobs SET last_run_time = ?1, next_run_time = ?2, last_error = ?3, \
             runs_total = ?4 WHERE job_id = ?5",
        )
        .bind(outcome.last_run_time)
        .bind(outcome.next_run_time)
        .bind(&outcome.last_error)
        .bind(outcome.runs_total as i64)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE jobs SET status = ?1 WHERE job_id = ?2")
            .bind(status_to_str(status))
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }
}
