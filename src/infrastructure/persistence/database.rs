use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared SQLite pool plus schema initialization, matching the indices
/// required by the Repository capability (§6.2):
/// `connectors` unique on `exchange_id`; `jobs` unique on
/// `(exchange_id, symbol, timeframe)` with a secondary index on
/// `(status, next_run_time)`; `ohlcv` unique on
/// `(exchange_id, symbol, timeframe, open_time)` with a secondary
/// `DESC` index for range/quality reads.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite database")?;

        info!(db_url, "connected to database");

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connectors (
                exchange_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                rate_limit INTEGER NOT NULL,
                period_ms INTEGER NOT NULL,
                min_delay_ms INTEGER NOT NULL,
                usage INTEGER NOT NULL,
                period_start TEXT NOT NULL,
                last_api_call_at TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create connectors table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                exchange_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                status TEXT NOT NULL,
                last_candle_time TEXT,
                locked_until TEXT,
                owner_nonce TEXT,
                last_run_time TEXT,
                next_run_time TEXT NOT NULL,
                last_error TEXT,
                runs_total INTEGER NOT NULL DEFAULT 0,
                indicator_config_override TEXT,
                UNIQUE (exchange_id, symbol, timeframe)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create jobs table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_status_next_run
            ON jobs (status, next_run_time);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create jobs scheduler index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ohlcv (
                exchange_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                open_time TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                indicators_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                PRIMARY KEY (exchange_id, symbol, timeframe, open_time)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create ohlcv table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ohlcv_range_desc
            ON ohlcv (exchange_id, symbol, timeframe, open_time DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create ohlcv range index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quality_records (
                exchange_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                total INTEGER NOT NULL,
                expected INTEGER NOT NULL,
                missing INTEGER NOT NULL,
                gaps_json TEXT NOT NULL,
                period_start TEXT,
                period_end TEXT,
                quality_status TEXT NOT NULL,
                freshness TEXT NOT NULL,
                checked_at TEXT NOT NULL,
                PRIMARY KEY (exchange_id, symbol, timeframe)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create quality_records table")?;

        info!("database schema initialized");
        Ok(())
    }
}
