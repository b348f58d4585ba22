//! Import pipeline: acceptance, chunk dispatch, and row processing

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{DataSync, ImportOptions};
use crate::artifact::{self, collections};
use crate::cancel::StopFlag;
use crate::codec;
use crate::config::RetryPolicy;
use crate::db::NewJob;
use crate::error::{Error, JobError, Result};
use crate::processor::ImportProcessor;
use crate::queue::{BatchId, BatchOptions, Task};
use crate::retry::run_with_retry;
use crate::types::{Event, FailedRow, JobId, JobKind, Row, Status};

impl DataSync {
    /// Start an import job from a local CSV file
    ///
    /// Acceptance runs synchronously: the processor must be registered, the
    /// file must exist, and its header row must cover the processor's
    /// expected headers. The source is copied into artifact storage, the job
    /// record is created, and chunk processing runs in the background.
    pub async fn start_import(
        &self,
        processor_name: &str,
        path: &Path,
        options: ImportOptions,
    ) -> Result<JobId> {
        let processor = self.processor(processor_name).await?;

        if !tokio::fs::try_exists(path).await? {
            return Err(Error::Job(JobError::SourceMissing {
                path: path.to_path_buf(),
            }));
        }

        let source_path = path.to_path_buf();
        let (headers, total) = tokio::task::spawn_blocking(move || -> Result<(Vec<String>, u64)> {
            let headers = codec::read_file_headers(&source_path)?;
            let total = codec::count_data_rows(&source_path)?;
            Ok((headers, total))
        })
        .await
        .map_err(|e| Error::Other(format!("source inspection task failed: {e}")))??;

        let missing: Vec<String> = processor
            .expected_headers()
            .into_iter()
            .filter(|h| !headers.contains(h))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Job(JobError::HeaderMismatch { missing }));
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "import.csv".to_string());

        let job_id = self
            .db()
            .insert_job(&NewJob {
                kind: JobKind::Import,
                owner: options.owner.clone(),
                processor: processor.name().to_string(),
                filename: Some(filename),
                total_rows: total as i64,
            })
            .await?;

        let bytes = tokio::fs::read(path).await?;
        if let Err(e) = self
            .artifacts()
            .put(collections::FILES, &Self::source_artifact_name(job_id), &bytes)
            .await
        {
            self.mark_failed(job_id, &e).await;
            return Err(e);
        }

        tracing::info!(
            job_id = job_id.0,
            processor = processor.name(),
            rows = total,
            "Import job accepted"
        );

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_import(job_id, processor, total).await {
                tracing::error!(job_id = job_id.0, error = %e, "Import dispatch failed");
                engine.mark_failed(job_id, &e).await;
                engine.emit_event(Event::ImportCompleted {
                    job_id,
                    status: Status::Failed,
                });
            }
        });

        Ok(job_id)
    }

    async fn run_import(
        &self,
        job_id: JobId,
        processor: Arc<dyn ImportProcessor>,
        total: u64,
    ) -> Result<()> {
        let job = self.db().require_job(job_id).await?;
        if job.status.is_stop_requested() {
            // Stopped before it even started; just close out the record
            self.db().update_status(job_id, Status::Stopped).await?;
            self.db().set_completed(job_id).await?;
            self.emit_event(Event::ImportCompleted {
                job_id,
                status: Status::Stopped,
            });
            return Ok(());
        }

        self.db().update_status(job_id, Status::InProgress).await?;
        self.db().set_started(job_id).await?;
        self.emit_event(Event::ImportStarted { job_id });

        let work_path = self.import_work_path(job_id);
        artifact::materialize(
            self.artifacts().as_ref(),
            collections::FILES,
            &Self::source_artifact_name(job_id),
            &work_path,
        )
        .await?;

        if total == 0 {
            tracing::info!(job_id = job_id.0, "Import source has no data rows");
            self.finalize_import(job_id, Status::Completed).await;
            return Ok(());
        }

        let chunk_size = processor
            .chunk_size()
            .unwrap_or(self.config().imports.chunk_size);
        let batch_id = BatchId::generate();
        self.db().set_batch_id(job_id, batch_id.as_str()).await?;

        let stop = Arc::new(StopFlag::new(
            self.db.clone(),
            job_id,
            self.config().imports.stop_cache_ttl,
        ));

        let mut tasks: Vec<Arc<dyn Task>> = Vec::new();
        let mut offset = 0u64;
        while offset < total {
            tasks.push(Arc::new(ImportChunkTask {
                engine: self.clone(),
                job_id,
                processor: processor.clone(),
                work_path: work_path.clone(),
                offset,
                chunk_size,
                stop: stop.clone(),
            }));
            offset += chunk_size as u64;
        }

        tracing::info!(
            job_id = job_id.0,
            batch_id = %batch_id,
            chunks = tasks.len(),
            chunk_size,
            "Dispatching import batch"
        );

        // Chunk members run once: row side effects and counter flushes are
        // not idempotent, so a repeated attempt would re-apply rows and
        // double-count. Only the source-slice read inside the task retries.
        let handle = self
            .queue()
            .submit(
                batch_id,
                tasks,
                BatchOptions {
                    allow_failures: true,
                    retry: RetryPolicy::none(),
                },
            )
            .await;

        self.spawn_progress_watcher(job_id, handle.clone(), false);

        let engine = self.clone();
        tokio::spawn(async move {
            handle.settled().await;

            let status = match engine.db().get_job(job_id).await {
                Ok(Some(job)) if job.status.is_stop_requested() => Status::Stopped,
                Ok(Some(_)) => Status::Completed,
                Ok(None) => {
                    tracing::warn!(job_id = job_id.0, "Job record vanished during settlement");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = job_id.0,
                        error = %e,
                        "Failed to read job during settlement, assuming completed"
                    );
                    Status::Completed
                }
            };

            engine.finalize_import(job_id, status).await;
            engine.dispatch_failed_chunk_collation(job_id).await;
        });

        Ok(())
    }

    /// Close out an import job: final status, timestamps, scratch cleanup
    async fn finalize_import(&self, job_id: JobId, status: Status) {
        if let Err(e) = self.db().update_status(job_id, status).await {
            tracing::warn!(job_id = job_id.0, error = %e, "Failed to set final import status");
        }
        if let Err(e) = self.db().set_completed(job_id).await {
            tracing::warn!(job_id = job_id.0, error = %e, "Failed to set completed timestamp");
        }

        let work_path = self.import_work_path(job_id);
        if let Err(e) = tokio::fs::remove_file(&work_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = job_id.0, error = %e, "Failed to remove working file");
            }
        }
        if let Err(e) = self
            .artifacts()
            .delete(collections::FILES, &Self::source_artifact_name(job_id))
            .await
        {
            tracing::warn!(job_id = job_id.0, error = %e, "Failed to delete stored source");
        }

        self.emit_event(Event::ImportCompleted { job_id, status });
        tracing::info!(
            job_id = job_id.0,
            status = status.as_str(),
            "Import finished"
        );
    }
}

/// One chunk of an import batch
struct ImportChunkTask {
    engine: DataSync,
    job_id: JobId,
    processor: Arc<dyn ImportProcessor>,
    work_path: PathBuf,
    offset: u64,
    chunk_size: usize,
    stop: Arc<StopFlag>,
}

impl ImportChunkTask {
    /// Materialize the working file if needed and read this chunk's slice
    async fn read_slice(&self) -> Result<Vec<Row>> {
        if !tokio::fs::try_exists(&self.work_path).await? {
            artifact::materialize(
                self.engine.artifacts().as_ref(),
                collections::FILES,
                &DataSync::source_artifact_name(self.job_id),
                &self.work_path,
            )
            .await?;
        }

        let path = self.work_path.clone();
        let offset = self.offset;
        let take = self.chunk_size;
        tokio::task::spawn_blocking(move || codec::read_row_range(&path, offset, take))
            .await
            .map_err(|e| Error::Other(format!("chunk read task failed: {e}")))?
    }

    async fn flush_processed(&self, pending: &mut i64) -> Result<()> {
        self.engine.db().add_rows_processed(self.job_id, *pending).await?;
        *pending = 0;
        Ok(())
    }

    async fn flush_failed(&self, pending: &mut i64) -> Result<()> {
        self.engine.db().add_rows_failed(self.job_id, *pending).await?;
        *pending = 0;
        Ok(())
    }
}

#[async_trait]
impl Task for ImportChunkTask {
    fn name(&self) -> String {
        format!("import-{}-chunk-{}", self.job_id, self.offset)
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() || self.stop.should_stop().await {
            tracing::debug!(
                job_id = self.job_id.0,
                offset = self.offset,
                "Stop requested, skipping chunk"
            );
            return Ok(());
        }

        // Only this read retries; once rows start being applied the chunk
        // must not run again
        let retry = self.engine.config().queue.import_retry.clone();
        let rows = run_with_retry(&retry, || self.read_slice()).await?;

        let flush_threshold = self.engine.config().imports.counter_flush_threshold as i64;
        let check_every = self.engine.config().imports.stop_check_rows;

        let mut processed_pending = 0i64;
        let mut failed_pending = 0i64;
        let mut failures: Vec<FailedRow> = Vec::new();
        let mut stopped_early = false;

        for (index, row) in rows.iter().enumerate() {
            if index > 0
                && index % check_every == 0
                && (cancel.is_cancelled() || self.stop.should_stop().await)
            {
                stopped_early = true;
                break;
            }

            let origin_row = self.offset + index as u64 + 1;
            let outcome = match self.processor.validate(row, origin_row) {
                Ok(()) => self.processor.process(row, origin_row).await,
                Err(message) => Err(message),
            };

            match outcome {
                Ok(()) => {
                    processed_pending += 1;
                    if processed_pending >= flush_threshold {
                        self.flush_processed(&mut processed_pending).await?;
                    }
                }
                Err(message) => {
                    failures.push(FailedRow {
                        row: row.clone(),
                        origin_row,
                        error: message,
                    });
                    failed_pending += 1;
                    if failed_pending >= flush_threshold {
                        self.flush_failed(&mut failed_pending).await?;
                    }
                }
            }
        }

        self.flush_processed(&mut processed_pending).await?;
        self.flush_failed(&mut failed_pending).await?;

        if !failures.is_empty() {
            let bytes = codec::write_failed_rows(&failures)?;
            let name = DataSync::chunk_failure_name(self.job_id, self.offset);
            self.engine
                .artifacts()
                .put(collections::FAILED_CHUNKS, &name, &bytes)
                .await?;
            tracing::debug!(
                job_id = self.job_id.0,
                offset = self.offset,
                failures = failures.len(),
                "Chunk failure report written"
            );
        }

        if stopped_early {
            tracing::info!(
                job_id = self.job_id.0,
                offset = self.offset,
                "Chunk wound down after stop request"
            );
        }
        Ok(())
    }
}
