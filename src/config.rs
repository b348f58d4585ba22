//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration for the engine
///
/// All fields have sensible defaults; `Config::default()` yields a working
/// setup rooted under `./data-sync`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_path: PathBuf,
    /// Root directory for artifact storage collections
    pub artifact_root: PathBuf,
    /// Scratch directory for materialized working files
    pub work_dir: PathBuf,
    /// Export pipeline settings
    pub exports: ExportSettings,
    /// Import pipeline settings
    pub imports: ImportSettings,
    /// Task queue settings
    pub queue: QueueSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data-sync/data-sync.db"),
            artifact_root: PathBuf::from("data-sync/artifacts"),
            work_dir: PathBuf::from("data-sync/work"),
            exports: ExportSettings::default(),
            imports: ImportSettings::default(),
            queue: QueueSettings::default(),
        }
    }
}

impl Config {
    /// Validate the configuration, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.exports.per_page == 0 {
            return Err(Error::Config {
                message: "per_page must be greater than zero".to_string(),
                key: Some("exports.per_page".to_string()),
            });
        }
        if self.imports.chunk_size == 0 {
            return Err(Error::Config {
                message: "chunk_size must be greater than zero".to_string(),
                key: Some("imports.chunk_size".to_string()),
            });
        }
        if self.imports.counter_flush_threshold == 0 {
            return Err(Error::Config {
                message: "counter_flush_threshold must be greater than zero".to_string(),
                key: Some("imports.counter_flush_threshold".to_string()),
            });
        }
        if self.imports.stop_check_rows == 0 {
            return Err(Error::Config {
                message: "stop_check_rows must be greater than zero".to_string(),
                key: Some("imports.stop_check_rows".to_string()),
            });
        }
        if self.queue.max_concurrent_tasks == 0 {
            return Err(Error::Config {
                message: "max_concurrent_tasks must be greater than zero".to_string(),
                key: Some("queue.max_concurrent_tasks".to_string()),
            });
        }
        Ok(())
    }
}

/// Export pipeline settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Rows fetched per page task
    pub per_page: u32,
    /// Directory prefix inside the files collection for final artifacts
    pub directory: Option<String>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            per_page: 2000,
            directory: None,
        }
    }
}

/// Import pipeline settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Default rows per chunk task (a processor may override)
    pub chunk_size: usize,
    /// Row events accumulated before flushing a counter to the job record
    pub counter_flush_threshold: usize,
    /// Rows between consultations of the stop flag
    pub stop_check_rows: usize,
    /// How long a stop flag read is cached before re-reading the status
    #[serde(with = "duration_secs")]
    pub stop_cache_ttl: Duration,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            counter_flush_threshold: 100,
            stop_check_rows: 10,
            stop_cache_ttl: Duration::from_secs(10),
        }
    }
}

/// Task queue settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum tasks running at once across all batches
    pub max_concurrent_tasks: usize,
    /// Retry policy for export page tasks
    pub export_retry: RetryPolicy,
    /// Retry policy for reading an import chunk's source slice
    ///
    /// Row processing itself runs once per chunk: its side effects and
    /// counter flushes are not idempotent.
    pub import_retry: RetryPolicy,
    /// Retry policy for collator tasks
    pub collate_retry: RetryPolicy,
    /// Broadcast event channel capacity
    pub event_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            export_retry: RetryPolicy::default(),
            import_retry: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            collate_retry: RetryPolicy::default(),
            event_capacity: 1000,
        }
    }
}

/// Retry policy for task attempts
///
/// Attempts are bounded, each attempt runs under a timeout, delays between
/// attempts grow linearly (`backoff_step * attempt`), and no attempt starts
/// after the overall deadline has elapsed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Timeout applied to each individual attempt
    #[serde(with = "duration_secs")]
    pub attempt_timeout: Duration,
    /// Linear backoff step between attempts
    #[serde(with = "duration_secs")]
    pub backoff_step: Duration,
    /// No attempt starts after this much time has passed
    #[serde(with = "duration_secs")]
    pub overall_deadline: Duration,
    /// Add random jitter to backoff delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            attempt_timeout: Duration::from_secs(90),
            backoff_step: Duration::from_secs(3),
            overall_deadline: Duration::from_secs(3600),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that runs the operation once with no timeout pressure
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout: Duration::from_secs(3600),
            backoff_step: Duration::ZERO,
            overall_deadline: Duration::from_secs(3600),
            jitter: false,
        }
    }
}

/// Serialize Durations as whole seconds for config files
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
