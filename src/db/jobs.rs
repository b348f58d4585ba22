//! Job record CRUD, status transitions, and row counters.

use crate::error::{DatabaseError, JobError};
use crate::types::{JobId, Status};
use crate::{Error, Result};

use super::{Database, JobRecord, NewJob};

const JOB_COLUMNS: &str = r#"
    id, kind, status, owner, processor, filename, batch_id,
    total_rows, rows_processed, rows_failed, error_message,
    created_at, started_at, completed_at
"#;

impl Database {
    /// Insert a new job record in `pending` state
    pub async fn insert_job(&self, job: &NewJob) -> Result<JobId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                kind, status, owner, processor, filename,
                total_rows, rows_processed, rows_failed, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.kind)
        .bind(Status::Pending)
        .bind(&job.owner)
        .bind(&job.processor)
        .bind(&job.filename)
        .bind(job.total_rows)
        .bind(0i64)
        .bind(0i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert job: {}",
                e
            )))
        })?;

        Ok(JobId(result.last_insert_rowid()))
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get job: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Get a job by ID, treating absence as an error
    pub async fn require_job(&self, id: JobId) -> Result<JobRecord> {
        self.get_job(id)
            .await?
            .ok_or(Error::Job(JobError::NotFound { id }))
    }

    /// List all jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list jobs: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Update job status, enforcing the lifecycle transition table
    ///
    /// Same-state updates are no-ops. Illegal transitions return
    /// [`JobError::InvalidTransition`] without touching the record.
    pub async fn update_status(&self, id: JobId, next: Status) -> Result<Status> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let current: Option<Status> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read job status: {}",
                    e
                )))
            })?;

        let current = current.ok_or(Error::Job(JobError::NotFound { id }))?;

        if current == next {
            return Ok(current);
        }
        if !current.can_transition_to(next) {
            return Err(Error::Job(JobError::InvalidTransition {
                id,
                from: current,
                to: next,
            }));
        }

        sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
            .bind(next)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update status: {}",
                    e
                )))
            })?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit status update: {}",
                e
            )))
        })?;

        Ok(next)
    }

    /// Record the batch correlation id for a job
    pub async fn set_batch_id(&self, id: JobId, batch_id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET batch_id = ? WHERE id = ?")
            .bind(batch_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set batch id: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Set the job's filename (final export artifact or import source)
    pub async fn set_filename(&self, id: JobId, filename: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET filename = ? WHERE id = ?")
            .bind(filename)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set filename: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Set job error message
    pub async fn set_error(&self, id: JobId, error: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET error_message = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set error: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Set job started timestamp
    pub async fn set_started(&self, id: JobId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE jobs SET started_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set started timestamp: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Set job completed timestamp
    pub async fn set_completed(&self, id: JobId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE jobs SET completed_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set completed timestamp: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Atomically add to the processed row counter
    ///
    /// In-place increment, never read-modify-write, so concurrent chunk
    /// workers cannot lose updates.
    pub async fn add_rows_processed(&self, id: JobId, count: i64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        sqlx::query("UPDATE jobs SET rows_processed = rows_processed + ? WHERE id = ?")
            .bind(count)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to add processed rows: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Atomically add to the failed row counter
    pub async fn add_rows_failed(&self, id: JobId, count: i64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        sqlx::query("UPDATE jobs SET rows_failed = rows_failed + ? WHERE id = ?")
            .bind(count)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to add failed rows: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
