//! Export pipeline: dispatch page tasks and serialize partials

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{DataSync, ExportOptions};
use crate::artifact::{ArtifactStore, collections};
use crate::codec;
use crate::db::NewJob;
use crate::error::Result;
use crate::queue::{BatchId, BatchOptions, Task};
use crate::source::RowSource;
use crate::types::{Event, JobId, JobKind, Status};

impl DataSync {
    /// Start an export job
    ///
    /// Counts the source, creates the job record, and returns immediately;
    /// page tasks run in the background. An empty source completes the job on
    /// the spot with nothing dispatched.
    pub async fn start_export(
        &self,
        source: Arc<dyn RowSource>,
        options: ExportOptions,
    ) -> Result<JobId> {
        let total = source.count().await?;

        let job_id = self
            .db()
            .insert_job(&NewJob {
                kind: JobKind::Export,
                owner: options.owner.clone(),
                processor: options.name.clone(),
                filename: None,
                total_rows: total as i64,
            })
            .await?;
        self.db().set_started(job_id).await?;

        if total == 0 {
            self.db().update_status(job_id, Status::Completed).await?;
            self.db().set_completed(job_id).await?;
            self.emit_event(Event::ExportCompleted {
                job_id,
                status: Status::Completed,
            });
            tracing::info!(job_id = job_id.0, "Export source is empty, nothing to dispatch");
            return Ok(job_id);
        }

        tracing::info!(
            job_id = job_id.0,
            name = %options.name,
            rows = total,
            "Export job accepted"
        );

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_export(job_id, source, options, total).await {
                tracing::error!(job_id = job_id.0, error = %e, "Export dispatch failed");
                engine.mark_failed(job_id, &e).await;
                engine.emit_event(Event::ExportCompleted {
                    job_id,
                    status: Status::Failed,
                });
            }
        });

        Ok(job_id)
    }

    async fn run_export(
        &self,
        job_id: JobId,
        source: Arc<dyn RowSource>,
        options: ExportOptions,
        total: u64,
    ) -> Result<()> {
        let per_page = options.per_page.unwrap_or(self.config().exports.per_page);
        let pages = total.div_ceil(per_page as u64) as u32;

        let batch_id = BatchId::generate();
        self.db().set_batch_id(job_id, batch_id.as_str()).await?;

        let tasks: Vec<Arc<dyn Task>> = (1..=pages)
            .map(|page| {
                Arc::new(ExportPageTask {
                    batch_id: batch_id.clone(),
                    page,
                    per_page,
                    source: source.clone(),
                    artifacts: self.artifacts().clone(),
                }) as Arc<dyn Task>
            })
            .collect();
        let dispatched = tasks.len();

        tracing::info!(
            job_id = job_id.0,
            batch_id = %batch_id,
            pages = dispatched,
            per_page,
            "Dispatching export batch"
        );

        let handle = self
            .queue()
            .submit(
                batch_id.clone(),
                tasks,
                BatchOptions {
                    allow_failures: true,
                    retry: self.config().queue.export_retry.clone(),
                },
            )
            .await;

        self.spawn_progress_watcher(job_id, handle.clone(), true);

        let engine = self.clone();
        tokio::spawn(async move {
            handle.settled().await;
            if handle.is_cancelled() {
                tracing::debug!(
                    job_id = job_id.0,
                    batch_id = %batch_id,
                    "Export batch cancelled, skipping collation"
                );
                // A page past its cancellation check can still write a
                // partial after the cancel-time sweep; sweep again now that
                // every member has finished
                engine.delete_export_partials(&batch_id).await;
                return;
            }
            engine
                .dispatch_export_collation(job_id, batch_id, dispatched, options)
                .await;
        });

        Ok(())
    }
}

/// One page of an export batch
struct ExportPageTask {
    batch_id: BatchId,
    page: u32,
    per_page: u32,
    source: Arc<dyn RowSource>,
    artifacts: Arc<dyn ArtifactStore>,
}

#[async_trait]
impl Task for ExportPageTask {
    fn name(&self) -> String {
        format!("export-{}-page-{}", self.batch_id, self.page)
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let rows = self.source.fetch_page(self.page, self.per_page).await?;
        if cancel.is_cancelled() {
            // Cancelled while fetching; don't leave a partial behind
            return Ok(());
        }
        if rows.is_empty() {
            // No artifact for an empty page; the collator treats the
            // resulting count mismatch as a failed export
            tracing::warn!(
                batch_id = %self.batch_id,
                page = self.page,
                "Export page came back empty"
            );
            return Ok(());
        }

        let bytes = codec::write_rows(&rows)?;
        let name = format!("export-{}-{:05}.csv", self.batch_id, self.page);
        self.artifacts
            .put(collections::EXPORT_PARTS, &name, &bytes)
            .await?;
        tracing::debug!(
            batch_id = %self.batch_id,
            page = self.page,
            rows = rows.len(),
            "Export page written"
        );
        Ok(())
    }
}
