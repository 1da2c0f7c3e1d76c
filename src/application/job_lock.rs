use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::clock::Clock;
use crate::domain::errors::RepositoryError;
use crate::domain::repositories::JobRepository;

/// Proof of ownership returned by a successful `acquire`. Only the holder
/// of a matching `nonce` may `release` or `heartbeat` the lease; a worker
/// whose lease already expired cannot clear a new owner's lock because its
/// `nonce` no longer matches (§4.2).
pub struct JobLockGuard {
    pub job_id: Uuid,
    pub nonce: Uuid,
}

/// Lease-based mutual exclusion on a job, self-healing across worker
/// crashes because the lease has a wall-clock expiry rather than relying
/// on an explicit release.
pub struct JobLock {
    repository: Arc<dyn JobRepository>,
    clock: Arc<dyn Clock>,
}

impl JobLock {
    pub fn new(repository: Arc<dyn JobRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Grants iff `locked_until` is null or in the past, atomically
    /// setting `locked_until := now + ttl` and recording a fresh nonce.
    pub async fn acquire(
        &self,
        job_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<JobLockGuard>, RepositoryError> {
        let nonce = Uuid::new_v4();
        let granted = self
            .repository
            .try_acquire_lock(job_id, nonce, ttl, self.clock.now())
            .await?;
        Ok(granted.then_some(JobLockGuard { job_id, nonce }))
    }

    pub async fn release(&self, guard: &JobLockGuard) -> Result<(), RepositoryError> {
        self.repository.release_lock(guard.job_id, guard.nonce).await
    }

    /// MUST be called at `ttl / 3` intervals during long backfills so the
    /// lease does not expire out from under an in-progress attempt.
    pub async fn heartbeat(
        &self,
        guard: &JobLockGuard,
        ttl: Duration,
    ) -> Result<bool, RepositoryError> {
        self.repository
            .heartbeat_lock(guard.job_id, guard.nonce, ttl, self.clock.now())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::SystemClock;
    use crate::domain::job::Job;
    use crate::domain::market::timeframe::Timeframe;
    use crate::infrastructure::persistence::database::Database;
    use crate::infrastructure::persistence::job_repository::SqliteJobRepository;
    use chrono::Utc;

    async fn seeded_repo() -> (Arc<dyn JobRepository>, Uuid) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(db.pool.clone()));
        let job = Job::new("binance", "BTCUSDT", Timeframe::OneHour, Utc::now());
        let job_id = job.job_id;
        repo.upsert(&job).await.unwrap();
        (repo, job_id)
    }

    #[tokio::test]
    async fn second_acquire_is_denied_while_first_holds_lease() {
        let (repo, job_id) = seeded_repo().await;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let lock = JobLock::new(repo, clock);

        let first = lock.acquire(job_id, Duration::from_secs(30)).await.unwrap();
        assert!(first.is_some());

        let second = lock.acquire(job_id, Duration::from_secs(30)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn stale_owner_cannot_release_a_new_owners_lock() {
        let (repo, job_id) = seeded_repo().await;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let lock = JobLock::new(repo.clone(), clock);

        let stale_guard = JobLockGuard {
            job_id,
            nonce: Uuid::new_v4(),
        };

        let real_guard = lock
            .acquire(job_id, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        // A release using a nonce that never won the lease must be a no-op.
        lock.release(&stale_guard).await.unwrap();

        let still_held = lock.acquire(job_id, Duration::from_secs(30)).await.unwrap();
        assert!(still_held.is_none(), "stale release must not clear the real owner's lock");

        lock.release(&real_guard).await.unwrap();
        let now_free = lock.acquire(job_id, Duration::from_secs(30)).await.unwrap();
        assert!(now_free.is_some());
    }
}
