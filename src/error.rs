//! Error types for data-sync
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Job, Database, Config)
//! - Retryability classification hooks for the task queue
//! - Context information (job ID, expected/found counts, file path, etc.)

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{JobId, Status};

/// Result type alias for data-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for data-sync
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "exports.per_page")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Job-related error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Artifact storage error
    #[error("artifact error: {0}")]
    Artifact(String),

    /// Export collation found a different number of partials than tasks dispatched
    #[error("collation mismatch: expected {expected} partial artifacts, found {found}")]
    CollationMismatch {
        /// Number of tasks dispatched for the batch
        expected: usize,
        /// Number of partial artifacts actually present
        found: usize,
    },

    /// Task attempt exceeded its per-attempt timeout
    #[error("operation timed out")]
    Timeout,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Job-related errors
#[derive(Debug, Error)]
pub enum JobError {
    /// Job record not found in the database
    #[error("job {id} not found")]
    NotFound {
        /// The job ID that was not found
        id: JobId,
    },

    /// Status update violates the lifecycle transition table
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The job whose status update was rejected
        id: JobId,
        /// Current persisted status
        from: Status,
        /// Status the caller tried to set
        to: Status,
    },

    /// No processor registered under the given identifier
    #[error("no processor registered for {name:?}")]
    UnknownProcessor {
        /// The processor identifier that was looked up
        name: String,
    },

    /// Import source file does not exist
    #[error("source file not found at {path}")]
    SourceMissing {
        /// The path where the source file was expected
        path: PathBuf,
    },

    /// Import source file is missing headers the processor requires
    #[error("source file is missing expected headers: {missing:?}")]
    HeaderMismatch {
        /// Headers the processor expects but the file does not carry
        missing: Vec<String>,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let err = Error::Config {
            message: "per_page must be greater than zero".to_string(),
            key: Some("exports.per_page".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "configuration error: per_page must be greater than zero"
        );

        let err = Error::CollationMismatch {
            expected: 3,
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "collation mismatch: expected 3 partial artifacts, found 2"
        );
    }

    #[test]
    fn job_error_display() {
        let err = JobError::NotFound { id: JobId(42) };
        assert_eq!(err.to_string(), "job 42 not found");

        let err = JobError::InvalidTransition {
            id: JobId(7),
            from: Status::Completed,
            to: Status::InProgress,
        };
        assert_eq!(err.to_string(), "job 7 cannot move from completed to in_progress");

        let err = JobError::HeaderMismatch {
            missing: vec!["email".to_string()],
        };
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn database_error_wraps_into_error() {
        let err: Error = DatabaseError::QueryFailed("boom".to_string()).into();
        assert_eq!(err.to_string(), "database error: query failed: boom");
    }

    #[test]
    fn io_error_wraps_into_error() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing file").into();
        assert!(err.to_string().starts_with("I/O error"));
    }
}
