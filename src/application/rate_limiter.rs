use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{debug, warn};

use crate::domain::clock::Clock;
use crate::domain::connector::AcquireOutcome;
use crate::domain::errors::RepositoryError;
use crate::domain::repositories::ConnectorRepository;

/// Per-connector token bucket wrapper over the repository's atomic
/// conditional update (§4.1). The bucket algorithm itself lives in the
/// repository implementation, where it can be expressed as a single
/// compare-and-set; this type owns only the "sleep and retry on denial"
/// policy callers rely on.
pub struct RateLimiter {
    repository: Arc<dyn ConnectorRepository>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(repository: Arc<dyn ConnectorRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// A single `Acquire` attempt. Denial is not an error.
    pub async fn acquire(
        &self,
        exchange_id: &str,
        weight: i64,
    ) -> Result<AcquireOutcome, RepositoryError> {
        self.repository
            .try_acquire(exchange_id, weight, self.clock.now())
            .await
    }

    /// Blocks the caller until a token is granted, sleeping `wait_hint_ms`
    /// between attempts. Every external API call MUST be guarded by a
    /// successful `Acquire` before this returns.
    pub async fn acquire_blocking(
        &self,
        exchange_id: &str,
        weight: i64,
    ) -> Result<(), RepositoryError> {
        loop {
            match self.acquire(exchange_id, weight).await? {
                AcquireOutcome::Granted => return Ok(()),
                AcquireOutcome::Denied { wait_hint_ms } => {
                    debug!(exchange_id, wait_hint_ms, "rate limit denied, sleeping");
                    let wait = wait_hint_ms.max(0) as u64;
                    tokio::time::sleep(StdDuration::from_millis(wait)).await;
                }
            }
        }
    }

    /// Admin: resets `usage := 0`, `period_start := now`.
    pub async fn reset(&self, exchange_id: &str) -> Result<(), RepositoryError> {
        warn!(exchange_id, "rate limiter reset requested");
        self.repository.reset_rate_limit(exchange_id, self.clock.now()).await
    }

    /// Admin: updates `limit`/`min_delay_ms` without disturbing `usage`.
    pub async fn update_limits(
        &self,
        exchange_id: &str,
        limit: i64,
        min_delay_ms: i64,
    ) -> Result<(), RepositoryError> {
        self.repository
            .update_rate_limits(exchange_id, limit, min_delay_ms)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::test_support::FakeClock;
    use crate::domain::connector::{Connector, RateLimitState};
    use crate::infrastructure::persistence::connector_repository::SqliteConnectorRepository;
    use crate::infrastructure::persistence::database::Database;
    use chrono::Utc;
    use std::time::Instant;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn two_racing_workers_never_both_exceed_limit() {
        let db = test_db().await;
        let repo: Arc<dyn ConnectorRepository> =
            Arc::new(SqliteConnectorRepository::new(db.pool.clone()));
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(now));

        let connector = Connector::new("binance", RateLimitState::new(1, 60_000, 0, now));
        repo.upsert(&connector).await.unwrap();

        let limiter = RateLimiter::new(repo.clone(), clock.clone());

        let first = limiter.acquire("binance", 1).await.unwrap();
        let second = limiter.acquire("binance", 1).await.unwrap();

        assert_eq!(first, AcquireOutcome::Granted);
        assert!(matches!(second, AcquireOutcome::Denied { .. }));
    }

    #[tokio::test]
    async fn acquire_blocking_eventually_succeeds_after_period_resets() {
        use crate::domain::clock::SystemClock;

        let db = test_db().await;
        let repo: Arc<dyn ConnectorRepository> =
            Arc::new(SqliteConnectorRepository::new(db.pool.clone()));
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let connector = Connector::new("binance", RateLimitState::new(1, 50, 0, now));
        repo.upsert(&connector).await.unwrap();

        let limiter = RateLimiter::new(repo.clone(), clock.clone());
        limiter.acquire("binance", 1).await.unwrap();

        let start = Instant::now();
        limiter.acquire_blocking("binance", 1).await.unwrap();
        assert!(start.elapsed() < StdDuration::from_secs(2));
    }
}
