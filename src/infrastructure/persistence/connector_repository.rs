use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::connector::{AcquireOutcome, Connector, ConnectorStatus, RateLimitState};
use crate::domain::errors::RepositoryError;
use crate::domain::repositories::ConnectorRepository;

pub struct SqliteConnectorRepository {
    pool: SqlitePool,
}

impl SqliteConnectorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Connection(e.to_string())
}

fn status_to_str(status: ConnectorStatus) -> &'static str {
    match status {
        ConnectorStatus::Active => "active",
        ConnectorStatus::Suspended => "suspended",
    }
}

fn status_from_str(s: &str) -> ConnectorStatus {
    match s {
        "suspended" => ConnectorStatus::Suspended,
        _ => ConnectorStatus::Active,
    }
}

#[async_trait]
impl ConnectorRepository for SqliteConnectorRepository {
    async fn get(&self, exchange_id: &str) -> Result<Option<Connector>, RepositoryError> {
        let row = sqlx::query(
            "SELECT exchange_id, status, rate_limit, period_ms, min_delay_ms, usage, period_start, last_api_call_at FROM connectors WHERE exchange_id = ?1",
        )
        .bind(exchange_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| Connector {
            exchange_id: r.get("exchange_id"),
            status: status_from_str(r.get("status")),
            rate_limit: RateLimitState {
                limit: r.get("rate_limit"),
                period_ms: r.get("period_ms"),
                min_delay_ms: r.get("min_delay_ms"),
                usage: r.get("usage"),
                period_start: r.get("period_start"),
                last_api_call_at: r.get("last_api_call_at"),
            },
        }))
    }

    async fn upsert(&self, connector: &Connector) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO connectors
                (exchange_id, status, rate_limit, period_ms, min_delay_ms, usage, period_start, last_api_call_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(exchange_id) DO UPDATE SET
                status = excluded.status,
                rate_limit = excluded.rate_limit,
                period_ms = excluded.period_ms,
                min_delay_ms = excluded.min_delay_ms,
                usage = excluded.usage,
                period_start = excluded.period_start,
                last_api_call_at = excluded.last_api_call_at
            "#,
        )
        .bind(&connector.exchange_id)
        .bind(status_to_str(connector.status))
        .bind(connector.rate_limit.limit)
        .bind(connector.rate_limit.period_ms)
        .bind(connector.rate_limit.min_delay_ms)
        .bind(connector.rate_limit.usage)
        .bind(connector.rate_limit.period_start)
        .bind(connector.rate_limit.last_api_call_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Connector>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT exchange_id, status, rate_limit, period_ms, min_delay_ms, usage, period_start, last_api_call_at FROM connectors WHERE status = 'active'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| Connector {
                exchange_id: r.get("exchange_id"),
                status: status_from_str(r.get("status")),
                rate_limit: RateLimitState {
                    limit: r.get("rate_limit"),
                    period_ms: r.get("period_ms"),
                    min_delay_ms: r.get("min_delay_ms"),
                    usage: r.get("usage"),
                    period_start: r.get("period_start"),
                    last_api_call_at: r.get("last_api_call_at"),
                },
            })
            .collect())
    }

    /// Implements §4.1 steps 1-5 as a single SQLite write transaction.
    /// `BEGIN IMMEDIATE` takes the write lock up front, so the read-modify-
    /// write below is serialized against every other `try_acquire` call on
    /// this database: two callers racing on `usage = limit - 1` cannot
    /// both observe the pre-increment row and both grant.
    async fn try_acquire(
        &self,
        exchange_id: &str,
        weight: i64,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, RepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;

        let row = sqlx::query(
            "SELECT rate_limit, period_ms, min_delay_ms, usage, period_start, last_api_call_at FROM connectors WHERE exchange_id = ?1",
        )
        .bind(exchange_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            sqlx::query("ROLLBACK").execute(&mut *conn).await.ok();
            return Err(RepositoryError::NotFound(exchange_id.to_string()));
        };

        let limit: i64 = row.get("rate_limit");
        let period_ms: i64 = row.get("period_ms");
        let min_delay_ms: i64 = row.get("min_delay_ms");
        let mut usage: i64 = row.get("usage");
        let mut period_start: DateTime<Utc> = row.get("period_start");
        let last_api_call_at: Option<DateTime<Utc>> = row.get("last_api_call_at");

        if (now - period_start).num_milliseconds() >= period_ms {
            period_start = now;
            usage = 0;
        }

        if let Some(last) = last_api_call_at {
            let since_last_ms = (now - last).num_milliseconds();
            if since_last_ms < min_delay_ms {
                sqlx::query(
                    "UPDATE connectors SET period_start = ?1, usage = ?2 WHERE exchange_id = ?3",
                )
                .bind(period_start)
                .bind(usage)
                .bind(exchange_id)
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
                sqlx::query("COMMIT").execute(&mut *conn).await.map_err(db_err)?;
                return Ok(AcquireOutcome::Denied {
                    wait_hint_ms: min_delay_ms - since_last_ms,
                });
            }
        }

        if usage + weight > limit {
            sqlx::query("UPDATE connectors SET period_start = ?1, usage = ?2 WHERE exchange_id = ?3")
                .bind(period_start)
                .bind(usage)
                .bind(exchange_id)
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            sqlx::query("COMMIT").execute(&mut *conn).await.map_err(db_err)?;
            let wait_hint_ms = period_ms - (now - period_start).num_milliseconds();
            return Ok(AcquireOutcome::Denied { wait_hint_ms });
        }

        usage += weight;
        sqlx::query(
            "UPDATE connectors SET period_start = ?1, usage = ?2, last_api_call_at = ?3 WHERE exchange_id = ?4",
        )
        .bind(period_start)
        .bind(usage)
        .bind(now)
        .bind(exchange_id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
        sqlx::query("COMMIT").execute(&mut *conn).await.map_err(db_err)?;

        Ok(AcquireOutcome::Granted)
    }

    async fn reset_rate_limit(
        &self,
        exchange_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE connectors SET usage = 0, period_start = ?1 WHERE exchange_id = ?2")
            .bind(now)
            .bind(exchange_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_rate_limits(
        &self,
        exchange_id: &str,
        limit: i64,
        min_delay_ms: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE connectors SET rate_limit = ?1, min_delay_ms = ?2 WHERE exchange_id = ?3",
        )
        .bind(limit)
        .bind(min_delay_ms)
        .bind(exchange_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
