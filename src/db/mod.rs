//! Database layer for data-sync
//!
//! Handles SQLite persistence for job records.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`jobs`] — Job record CRUD, status transitions, row counters

use crate::types::{JobId, JobKind, Status};
use sqlx::{FromRow, sqlite::SqlitePool};

mod jobs;
mod migrations;

/// New job record to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Kind of work (import or export)
    pub kind: JobKind,
    /// Optional owner reference (user id, service name)
    pub owner: Option<String>,
    /// Processor identifier (import) or export name
    pub processor: String,
    /// Source or final artifact filename, if known at creation
    pub filename: Option<String>,
    /// Total data rows the job covers
    pub total_rows: i64,
}

/// Job record from database
#[derive(Debug, Clone, FromRow)]
pub struct JobRecord {
    /// Unique database ID
    pub id: JobId,
    /// Kind of work (import or export)
    pub kind: JobKind,
    /// Current lifecycle status
    pub status: Status,
    /// Optional owner reference (user id, service name)
    pub owner: Option<String>,
    /// Processor identifier (import) or export name
    pub processor: String,
    /// Source or final artifact filename
    pub filename: Option<String>,
    /// Batch correlation id once tasks are dispatched
    pub batch_id: Option<String>,
    /// Total data rows the job covers
    pub total_rows: i64,
    /// Rows processed successfully so far
    pub rows_processed: i64,
    /// Rows that failed validation or processing so far
    pub rows_failed: i64,
    /// Error message if the job failed
    pub error_message: Option<String>,
    /// Unix timestamp when the record was created
    pub created_at: i64,
    /// Unix timestamp when work started
    pub started_at: Option<i64>,
    /// Unix timestamp when the job settled
    pub completed_at: Option<i64>,
}

/// Database handle for data-sync
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
