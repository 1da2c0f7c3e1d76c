use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::RepositoryError;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::quality::{Freshness, Gap, QualityRecord, QualityStatus};
use crate::domain::repositories::QualityRepository;
use std::str::FromStr;

pub struct SqliteQualityRepository {
    pool: SqlitePool,
}

impl SqliteQualityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Connection(e.to_string())
}

fn status_to_str(status: QualityStatus) -> &'static str {
    match status {
        QualityStatus::Excellent => "excellent",
        QualityStatus::Good => "good",
        QualityStatus::Fair => "fair",
        QualityStatus::Poor => "poor",
    }
}

fn status_from_str(s: &str) -> QualityStatus {
    match s {
        "good" => QualityStatus::Good,
        "fair" => QualityStatus::Fair,
        "poor" => QualityStatus::Poor,
        _ => QualityStatus::Excellent,
    }
}

fn freshness_to_str(f: Freshness) -> &'static str {
    match f {
        Freshness::Fresh => "fresh",
        Freshness::Stale => "stale",
        Freshness::VeryStale => "very_stale",
    }
}

fn freshness_from_str(s: &str) -> Freshness {
    match s {
        "stale" => Freshness::Stale,
        "very_stale" => Freshness::VeryStale,
        _ => Freshness::Fresh,
    }
}

#[async_trait]
impl QualityRepository for SqliteQualityRepository {
    async fn save(&self, record: &QualityRecord) -> Result<(), RepositoryError> {
        let gaps_json =
            serde_json::to_string(&record.gaps).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO quality_records
                (exchange_id, symbol, timeframe, total, expected, missing, gaps_json,
                 period_start, period_end, quality_status, freshness, checked_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(exchange_id, symbol, timeframe) DO UPDATE SET
                total = excluded.total,
                expected = excluded.expected,
                missing = excluded.missing,
                gaps_json = excluded.gaps_json,
                period_start = excluded.period_start,
                period_end = excluded.period_end,
                quality_status = excluded.quality_status,
                freshness = excluded.freshness,
                checked_at = excluded.checked_at
            "#,
        )
        .bind(&record.exchange_id)
        .bind(&record.symbol)
        .bind(record.timeframe.label())
        .bind(record.total)
        .bind(record.expected)
        .bind(record.missing)
        .bind(gaps_json)
        .bind(record.period_start)
        .bind(record.period_end)
        .bind(status_to_str(record.quality_status))
        .bind(freshness_to_str(record.freshness))
        .bind(record.checked_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get(
        &self,
        exchange_id: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<QualityRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT exchange_id, symbol, timeframe, total, expected, missing, gaps_json, \
             period_start, period_end, quality_status, freshness, checked_at FROM quality_records \
             WHERE exchange_id = ?1 AND symbol = ?2 AND timeframe = ?3",
        )
        .bind(exchange_id)
        .bind(symbol)
        .bind(timeframe.label())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(r) = row else { return Ok(None) };

        let gaps_json: String = r.get("gaps_json");
        let gaps: Vec<Gap> =
            serde_json::from_str(&gaps_json).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let tf_str: String = r.get("timeframe");
        let record_timeframe =
            Timeframe::from_str(&tf_str).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        Ok(Some(QualityRecord {
            exchange_id: r.get("exchange_id"),
            symbol: r.get("symbol"),
            timeframe: record_timeframe,
            total: r.get("total"),
            expected: r.get("expected"),
            missing: r.get("missing"),
            gaps,
            period_start: r.get("period_start"),
            period_end: r.get("period_end"),
            quality_status: status_from_str(r.get("quality_status")),
            freshness: freshness_from_str(r.get("freshness")),
            checked_at: r.get("checked_at"),
        }))
    }
}
