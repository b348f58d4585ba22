//! Failure report collation: merge per-chunk reports into one artifact

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::DataSync;
use crate::artifact::collections;
use crate::codec;
use crate::error::Result;
use crate::queue::{BatchId, BatchOptions, Task};
use crate::types::JobId;

impl DataSync {
    /// Submit the failure report collator for a settled import as its own task
    pub(crate) async fn dispatch_failed_chunk_collation(&self, job_id: JobId) {
        let task = Arc::new(CollateFailedChunksTask {
            engine: self.clone(),
            job_id,
        }) as Arc<dyn Task>;

        self.queue()
            .submit(
                BatchId::generate(),
                vec![task],
                BatchOptions {
                    allow_failures: true,
                    retry: self.config().queue.collate_retry.clone(),
                },
            )
            .await;
    }

    /// Merge per-chunk failure reports into one artifact per job
    ///
    /// Chunks that cannot be read are logged and skipped rather than blocking
    /// the rest of the report. Consumed chunk reports are deleted; with no
    /// failures at all, no combined artifact is written. Safe to re-run.
    pub(crate) async fn collate_failed_chunks(&self, job_id: JobId) -> Result<()> {
        let prefix = format!("import-{job_id}-chunk-");
        let chunk_names = self
            .artifacts()
            .list(collections::FAILED_CHUNKS, &prefix)
            .await?;
        if chunk_names.is_empty() {
            tracing::debug!(job_id = job_id.0, "No failure chunks to collate");
            return Ok(());
        }

        let mut parts = Vec::with_capacity(chunk_names.len());
        for name in &chunk_names {
            match self.artifacts().get(collections::FAILED_CHUNKS, name).await {
                Ok(bytes) => parts.push(bytes),
                Err(e) => {
                    tracing::error!(
                        job_id = job_id.0,
                        artifact = %name,
                        error = %e,
                        "Failed to read failure chunk, skipping it"
                    );
                }
            }
        }
        let combined = codec::concat_tables(&parts)?;

        for name in &chunk_names {
            if let Err(e) = self
                .artifacts()
                .delete(collections::FAILED_CHUNKS, name)
                .await
            {
                tracing::warn!(
                    job_id = job_id.0,
                    artifact = %name,
                    error = %e,
                    "Failed to delete consumed failure chunk"
                );
            }
        }

        if combined.is_empty() {
            return Ok(());
        }

        let name = format!("import-{job_id}-failed.csv");
        self.artifacts()
            .put(collections::FAILED, &name, &combined)
            .await?;
        tracing::info!(
            job_id = job_id.0,
            artifact = %name,
            chunks = chunk_names.len(),
            "Failure report collated"
        );
        Ok(())
    }
}

struct CollateFailedChunksTask {
    engine: DataSync,
    job_id: JobId,
}

#[async_trait]
impl Task for CollateFailedChunksTask {
    fn name(&self) -> String {
        format!("collate-failures-{}", self.job_id)
    }

    async fn run(&self, _cancel: &CancellationToken) -> Result<()> {
        self.engine.collate_failed_chunks(self.job_id).await
    }
}
