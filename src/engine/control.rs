//! Cancellation of running jobs

use super::DataSync;
use crate::artifact::collections;
use crate::error::Result;
use crate::queue::BatchId;
use crate::types::{JobId, JobKind, Status};

/// Outcome of a cancellation request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The batch was cancelled and the job marked stopped
    Cancelled,
    /// No live batch to cancel; nothing changed
    BatchNotFound,
}

impl DataSync {
    /// Request cancellation of a running job
    ///
    /// Cancels the job's batch (skipping pending members, signalling running
    /// ones) and marks the record `stopped`. Export partials already produced
    /// are deleted. A job without a live batch, including one that already
    /// settled, is reported as [`CancelOutcome::BatchNotFound`].
    pub async fn request_cancel(&self, job_id: JobId) -> Result<CancelOutcome> {
        let job = self.db().require_job(job_id).await?;

        if job.status.is_terminal() {
            tracing::warn!(
                job_id = job_id.0,
                status = job.status.as_str(),
                "Cancel requested for a settled job"
            );
            return Ok(CancelOutcome::BatchNotFound);
        }

        let Some(batch_id) = job.batch_id.clone() else {
            tracing::warn!(job_id = job_id.0, "Cancel requested before a batch was dispatched");
            return Ok(CancelOutcome::BatchNotFound);
        };
        let batch_id = BatchId::from(batch_id);

        let Some(batch) = self.queue().find_batch(&batch_id).await else {
            tracing::warn!(
                job_id = job_id.0,
                batch_id = %batch_id,
                "Cancel requested but the batch is not known to the queue"
            );
            return Ok(CancelOutcome::BatchNotFound);
        };

        batch.cancel();
        self.db().update_status(job_id, Status::Stopped).await?;
        tracing::info!(job_id = job_id.0, batch_id = %batch_id, "Job cancelled");

        if job.kind == JobKind::Export {
            self.delete_export_partials(&batch_id).await;
        }

        Ok(CancelOutcome::Cancelled)
    }

    /// Delete all export partials belonging to a batch
    pub(crate) async fn delete_export_partials(&self, batch_id: &BatchId) {
        let prefix = format!("export-{batch_id}-");
        let names = match self.artifacts().list(collections::EXPORT_PARTS, &prefix).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(batch_id = %batch_id, error = %e, "Failed to list export partials");
                return;
            }
        };
        for name in names {
            if let Err(e) = self.artifacts().delete(collections::EXPORT_PARTS, &name).await {
                tracing::warn!(
                    batch_id = %batch_id,
                    artifact = %name,
                    error = %e,
                    "Failed to delete export partial"
                );
            }
        }
    }
}
