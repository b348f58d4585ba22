//! # data-sync
//!
//! Embeddable bulk import/export pipeline for tabular datasets.
//!
//! Datasets are split into chunks (imports) or pages (exports), each slice
//! runs as an independent batch task behind an allow-failures settlement
//! barrier, and a collation step assembles the results. A persistent job
//! record tracks lifecycle and row counters throughout.
//!
//! ## Design Philosophy
//!
//! data-sync is designed to be:
//! - **Library-first** - No CLI or HTTP surface, purely a Rust crate for embedding
//! - **Fire-and-forget** - Entry points return immediately, work runs on background tasks
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Cooperative** - Cancellation is advisory, workers wind down at safe points
//!
//! ## Quick Start
//!
//! ```no_run
//! use data_sync::{Config, DataSync, ExportOptions, MemoryRowSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = DataSync::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let source = Arc::new(MemoryRowSource::new(vec![]));
//!     let job_id = engine
//!         .start_export(source, ExportOptions::new("customers"))
//!         .await?;
//!     println!("export job {job_id} dispatched");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Artifact storage abstraction
pub mod artifact;
/// Cooperative stop flag with TTL-cached status reads
pub mod cancel;
/// CSV encoding and decoding helpers
pub mod codec;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Core engine implementation (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Import processor traits and registry
pub mod processor;
/// In-process task queue with batch settlement
pub mod queue;
/// Retry logic with linear backoff
pub mod retry;
/// Row sources for exports
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use artifact::{ArtifactStore, LocalArtifactStore, collections};
pub use config::{Config, ExportSettings, ImportSettings, QueueSettings, RetryPolicy};
pub use db::{Database, JobRecord, NewJob};
pub use engine::{CancelOutcome, DataSync, ExportOptions, ImportOptions};
pub use error::{DatabaseError, Error, JobError, Result};
pub use processor::{ImportProcessor, ProcessorRegistry, RowResult};
pub use queue::{BatchHandle, BatchId, BatchOptions, BatchProgress, Task, TaskQueue};
pub use retry::IsRetryable;
pub use source::{MemoryRowSource, RowSource};
pub use types::{Event, FailedRow, JobId, JobKind, Row, Status};
