//! Core engine implementation
//!
//! [`DataSync`] is the embeddable facade over the persistence layer, the
//! artifact store, and the task queue. Entry points validate up front, then
//! hand off to background tasks and return; consumers follow progress through
//! the broadcast event stream.

mod control;
mod export;
mod export_collate;
mod import;
mod import_collate;

pub use control::CancelOutcome;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::artifact::{ArtifactStore, LocalArtifactStore};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, JobError, Result};
use crate::processor::{ImportProcessor, ProcessorRegistry};
use crate::queue::{BatchHandle, TaskQueue};
use crate::types::{Event, JobId, Status};

/// Options for starting an export job
#[derive(Clone, Debug, Default)]
pub struct ExportOptions {
    /// Base name of the final artifact (a timestamp is appended)
    pub name: String,
    /// Rows per page task, overriding the configured default
    pub per_page: Option<u32>,
    /// Directory prefix inside the files collection, overriding the default
    pub directory: Option<String>,
    /// Owner recorded on the job
    pub owner: Option<String>,
}

impl ExportOptions {
    /// Options for an export named `name` with configured defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Options for starting an import job
#[derive(Clone, Debug, Default)]
pub struct ImportOptions {
    /// Owner recorded on the job
    pub owner: Option<String>,
}

/// Embeddable bulk import/export engine
///
/// Cheap to clone; all clones share the same database pool, artifact store,
/// queue, and event channel.
#[derive(Clone)]
pub struct DataSync {
    config: Arc<Config>,
    db: Arc<Database>,
    artifacts: Arc<dyn ArtifactStore>,
    queue: Arc<TaskQueue>,
    registry: Arc<RwLock<ProcessorRegistry>>,
    event_tx: broadcast::Sender<Event>,
}

impl DataSync {
    /// Create an engine from configuration
    ///
    /// Validates the configuration, opens (and migrates) the database, and
    /// prepares the artifact root and scratch directory.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.database_path).await?);
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(LocalArtifactStore::new(config.artifact_root.clone()).await?);
        tokio::fs::create_dir_all(&config.work_dir).await?;

        Ok(Self::assemble(config, db, artifacts))
    }

    /// Create an engine with a custom artifact backend
    pub async fn with_artifact_store(
        config: Config,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.database_path).await?);
        tokio::fs::create_dir_all(&config.work_dir).await?;

        Ok(Self::assemble(config, db, artifacts))
    }

    fn assemble(config: Config, db: Arc<Database>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        let queue = Arc::new(TaskQueue::new(config.queue.max_concurrent_tasks));
        let (event_tx, _) = broadcast::channel(config.queue.event_capacity);

        Self {
            config: Arc::new(config),
            db,
            artifacts,
            queue,
            registry: Arc::new(RwLock::new(ProcessorRegistry::new())),
            event_tx,
        }
    }

    /// Subscribe to engine events
    ///
    /// Slow consumers that fall more than the channel capacity behind miss
    /// older events (standard broadcast lag semantics).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Register an import processor, replacing any previous entry for its name
    pub async fn register_processor(&self, processor: Arc<dyn ImportProcessor>) {
        self.registry.write().await.register(processor);
    }

    /// Registered processor identifiers, sorted
    pub async fn processor_names(&self) -> Vec<String> {
        self.registry.read().await.names()
    }

    /// Fetch a job record
    pub async fn job(&self, id: JobId) -> Result<crate::db::JobRecord> {
        self.db.require_job(id).await
    }

    /// List all job records, newest first
    pub async fn jobs(&self) -> Result<Vec<crate::db::JobRecord>> {
        self.db.list_jobs().await
    }

    /// The engine's database handle
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The engine's artifact store
    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub(crate) async fn processor(&self, name: &str) -> Result<Arc<dyn ImportProcessor>> {
        self.registry
            .read()
            .await
            .get(name)
            .ok_or_else(|| {
                Error::Job(JobError::UnknownProcessor {
                    name: name.to_string(),
                })
            })
    }

    /// Send an event to subscribers; send errors just mean nobody is listening
    pub(crate) fn emit_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Mark a job failed and record the error message
    pub(crate) async fn mark_failed(&self, job_id: JobId, error: &Error) {
        if let Err(e) = self.db.update_status(job_id, Status::Failed).await {
            tracing::warn!(job_id = job_id.0, error = %e, "Failed to mark job failed");
        }
        if let Err(e) = self.db.set_error(job_id, &error.to_string()).await {
            tracing::warn!(job_id = job_id.0, error = %e, "Failed to record job error");
        }
    }

    /// Relay batch progress to the event stream until the batch settles
    ///
    /// When `mark_in_progress` is set, the first progress update also moves
    /// the job record to `in_progress`.
    pub(crate) fn spawn_progress_watcher(
        &self,
        job_id: JobId,
        handle: BatchHandle,
        mark_in_progress: bool,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut watch = handle.progress_watch();
            let mut marked = !mark_in_progress;
            loop {
                tokio::select! {
                    changed = watch.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let progress = *watch.borrow_and_update();
                        if !marked {
                            marked = true;
                            if let Err(e) = engine.db.update_status(job_id, Status::InProgress).await {
                                tracing::warn!(
                                    job_id = job_id.0,
                                    error = %e,
                                    "Failed to mark job in progress"
                                );
                            }
                        }
                        engine.emit_event(Event::RunProgressed {
                            job_id,
                            finished: progress.finished,
                            failed: progress.failed,
                            total: progress.total,
                        });
                        if progress.finished >= progress.total {
                            break;
                        }
                    }
                    _ = handle.settled() => break,
                }
            }

            let settled = handle.settled().await;
            engine.emit_event(Event::RunSettled {
                job_id,
                failed: settled.failed,
                total: settled.total,
            });
        });
    }

    /// Name of the stored source artifact for an import job
    pub(crate) fn source_artifact_name(job_id: JobId) -> String {
        format!("import-{job_id}-source.csv")
    }

    /// Name of a per-chunk failure report artifact
    pub(crate) fn chunk_failure_name(job_id: JobId, offset: u64) -> String {
        format!("import-{job_id}-chunk-{offset:08}.csv")
    }

    /// Scratch path where an import job's source is materialized
    pub(crate) fn import_work_path(&self, job_id: JobId) -> PathBuf {
        self.config.work_dir.join(format!("import-{job_id}.csv"))
    }
}
