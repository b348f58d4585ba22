//! Cooperative stop flag with TTL-cached status reads
//!
//! Import chunk workers consult this flag between rows. To avoid hammering
//! the database, the persisted status is re-read at most once per TTL; all
//! workers of a job share one flag, so a stop request propagates to every
//! chunk within one TTL window.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::db::Database;
use crate::types::JobId;

/// Shared cooperative stop signal for one job's workers
pub struct StopFlag {
    db: Arc<Database>,
    job_id: JobId,
    ttl: Duration,
    cached: Mutex<Option<(Instant, bool)>>,
}

impl StopFlag {
    /// Create a flag for `job_id` with the given cache TTL
    pub fn new(db: Arc<Database>, job_id: JobId, ttl: Duration) -> Self {
        Self {
            db,
            job_id,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Whether a stop has been requested for the job
    ///
    /// Returns the cached answer while it is fresh. A database error is
    /// logged and treated as "keep going"; a missing record means stop.
    pub async fn should_stop(&self) -> bool {
        let mut cached = self.cached.lock().await;
        if let Some((read_at, value)) = *cached {
            if read_at.elapsed() < self.ttl {
                return value;
            }
        }

        let value = match self.db.get_job(self.job_id).await {
            Ok(Some(job)) => job.status.is_stop_requested(),
            Ok(None) => {
                tracing::warn!(job_id = self.job_id.0, "Job record vanished, stopping worker");
                true
            }
            Err(e) => {
                tracing::warn!(
                    job_id = self.job_id.0,
                    error = %e,
                    "Failed to read job status for stop flag, continuing"
                );
                cached.map(|(_, v)| v).unwrap_or(false)
            }
        };

        *cached = Some((Instant::now(), value));
        value
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewJob;
    use crate::types::{JobKind, Status};
    use tempfile::NamedTempFile;

    async fn job_with_db() -> (NamedTempFile, Arc<Database>, JobId) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp_file.path()).await.unwrap());
        let id = db
            .insert_job(&NewJob {
                kind: JobKind::Import,
                owner: None,
                processor: "users".to_string(),
                filename: None,
                total_rows: 10,
            })
            .await
            .unwrap();
        (temp_file, db, id)
    }

    #[tokio::test]
    async fn running_job_does_not_stop() {
        let (_file, db, id) = job_with_db().await;
        db.update_status(id, Status::InProgress).await.unwrap();

        let flag = StopFlag::new(db, id, Duration::from_secs(10));
        assert!(!flag.should_stop().await);
    }

    #[tokio::test]
    async fn stopping_status_requests_stop() {
        let (_file, db, id) = job_with_db().await;
        db.update_status(id, Status::InProgress).await.unwrap();
        db.update_status(id, Status::Stopping).await.unwrap();

        let flag = StopFlag::new(db, id, Duration::from_secs(10));
        assert!(flag.should_stop().await);
    }

    #[tokio::test]
    async fn cached_answer_hides_changes_until_ttl_expires() {
        let (_file, db, id) = job_with_db().await;
        db.update_status(id, Status::InProgress).await.unwrap();

        let flag = StopFlag::new(db.clone(), id, Duration::from_millis(50));
        assert!(!flag.should_stop().await);

        db.update_status(id, Status::Stopping).await.unwrap();

        // Still inside the TTL window: stale answer
        assert!(!flag.should_stop().await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(flag.should_stop().await, "fresh read after TTL expiry");
    }

    #[tokio::test]
    async fn missing_record_stops_the_worker() {
        let (_file, db, id) = job_with_db().await;
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();

        let flag = StopFlag::new(db, id, Duration::from_secs(10));
        assert!(flag.should_stop().await);
    }
}
