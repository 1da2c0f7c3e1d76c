use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::RepositoryError;
use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::repositories::CandleRepository;

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Connection(e.to_string())
}

fn dec_err(e: rust_decimal::Error) -> RepositoryError {
    RepositoryError::Serialization(e.to_string())
}

fn row_to_candle(r: &sqlx::sqlite::SqliteRow) -> Result<Candle, RepositoryError> {
    let timeframe: String = r.get("timeframe");
    let timeframe =
        Timeframe::from_str(&timeframe).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    let open: String = r.get("open");
    let high: String = r.get("high");
    let low: String = r.get("low");
    let close: String = r.get("close");
    let volume: String = r.get("volume");
    let indicators_json: String = r.get("indicators_json");
    let indicators: BTreeMap<String, f64> = serde_json::from_str(&indicators_json)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    Ok(Candle {
        exchange_id: r.get("exchange_id"),
        symbol: r.get("symbol"),
        timeframe,
        open_time: r.get("open_time"),
        open: Decimal::from_str(&open).map_err(dec_err)?,
        high: Decimal::from_str(&high).map_err(dec_err)?,
        low: Decimal::from_str(&low).map_err(dec_err)?,
        close: Decimal::from_str(&close).map_err(dec_err)?,
        volume: Decimal::from_str(&volume).map_err(dec_err)?,
        indicators,
        created_at: r.get("created_at"),
    })
}

const SELECT_COLUMNS: &str = "exchange_id, symbol, timeframe, open_time, open, high, low, close, \
     volume, indicators_json, created_at";

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<(), RepositoryError> {
        if candles.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for c in candles {
            let indicators_json = serde_json::to_string(&c.indicators)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO ohlcv
                    (exchange_id, symbol, timeframe, open_time, open, high, low, close,
                     volume, indicators_json, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(exchange_id, symbol, timeframe, open_time) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    indicators_json = excluded.indicators_json
                "#,
            )
            .bind(&c.exchange_id)
            .bind(&c.symbol)
            .bind(c.timeframe.label())
            .bind(c.open_time)
            .bind(c.open.to_string())
            .bind(c.high.to_string())
            .bind(c.low.to_string())
            .bind(c.close.to_string())
            .bind(c.volume.to_string())
            .bind(indicators_json)
            .bind(c.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn range(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM ohlcv \
             WHERE exchange_id = ?1 AND symbol = ?2 AND timeframe = ?3 \
             AND (?4 IS NULL OR open_time >= ?4) \
             AND (?5 IS NULL OR open_time < ?5) \
             ORDER BY open_time ASC"
        ))
        .bind(exchange_id)
        .bind(symbol)
        .bind(timeframe.label())
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_candle).collect()
    }

    async fn earliest(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM ohlcv \
             WHERE exchange_id = ?1 AND symbol = ?2 AND timeframe = ?3 \
             ORDER BY open_time ASC LIMIT 1"
        ))
        .bind(exchange_id)
        .bind(symbol)
        .bind(timeframe.label())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_candle).transpose()
    }

    async fn latest(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM ohlcv \
             WHERE exchange_id = ?1 AND symbol = ?2 AND timeframe = ?3 \
             ORDER BY open_time DESC LIMIT 1"
        ))
        .bind(exchange_id)
        .bind(symbol)
        .bind(timeframe.label())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_candle).transpose()
    }

    async fn count(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM ohlcv WHERE exchange_id = ?1 AND symbol = ?2 AND timeframe = ?3",
        )
        .bind(exchange_id)
        .bind(symbol)
        .bind(timeframe.label())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.get("n"))
    }

    async fn update_indicators(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
        indicators: BTreeMap<String, f64>,
    ) -> Result<(), RepositoryError> {
        let indicators_json = serde_json::to_string(&indicators)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            "UPDATE ohlcv SET indicators_json = ?1 \
             WHERE exchange_id = ?2 AND symbol = ?3 AND timeframe = ?4 AND open_time = ?5",
        )
        .bind(indicators_json)
        .bind(exchange_id)
        .bind(symbol)
        .bind(timeframe.label())
        .bind(open_time)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}
