//! Export collation: merge partials into the final artifact

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{DataSync, ExportOptions};
use crate::artifact::collections;
use crate::codec;
use crate::error::{Error, Result};
use crate::queue::{BatchId, BatchOptions, Task};
use crate::types::{Event, JobId, Status};

impl DataSync {
    /// Submit the collator for a settled export batch as its own queue task
    ///
    /// The final artifact name is fixed here so that a retried collation
    /// attempt targets the same artifact instead of minting a new timestamp.
    pub(crate) async fn dispatch_export_collation(
        &self,
        job_id: JobId,
        batch_id: BatchId,
        dispatched: usize,
        options: ExportOptions,
    ) {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let file_name = format!("{}_{stamp}.csv", options.name);
        let directory = options
            .directory
            .clone()
            .or_else(|| self.config().exports.directory.clone());
        let final_name = match directory {
            Some(dir) => format!("{dir}/{file_name}"),
            None => file_name,
        };

        let task = Arc::new(CollateExportTask {
            engine: self.clone(),
            job_id,
            batch_id,
            dispatched,
            final_name,
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

    /// Merge a batch's partials into the final export artifact
    ///
    /// Safe to re-run: once the final artifact exists, another run only
    /// finishes any bookkeeping an interrupted attempt left behind and cleans
    /// up leftover partials. A partial count that does not match the
    /// dispatched task count fails the job, cancels the batch, and deletes
    /// the partials.
    pub(crate) async fn collate_export(
        &self,
        job_id: JobId,
        batch_id: &BatchId,
        dispatched: usize,
        final_name: &str,
    ) -> Result<()> {
        let job = self.db().require_job(job_id).await?;

        let recorded = job.status == Status::Completed && job.filename.is_some();
        if recorded || self.artifacts().exists(collections::FILES, final_name).await? {
            if !recorded {
                // An earlier attempt wrote the artifact but was cut off
                // before recording completion
                self.db().set_filename(job_id, final_name).await?;
                self.db().update_status(job_id, Status::Completed).await?;
                self.db().set_completed(job_id).await?;
                self.emit_event(Event::ExportCompleted {
                    job_id,
                    status: Status::Completed,
                });
            }
            tracing::debug!(
                job_id = job_id.0,
                batch_id = %batch_id,
                "Export already collated, cleaning up leftover partials"
            );
            self.delete_export_partials(batch_id).await;
            return Ok(());
        }

        let prefix = format!("export-{batch_id}-");
        let partial_names = self
            .artifacts()
            .list(collections::EXPORT_PARTS, &prefix)
            .await?;

        // Order partials by page number, not lexically
        let pattern = format!("^export-{}-(\\d+)\\.csv$", regex::escape(batch_id.as_str()));
        let page_re = regex::Regex::new(&pattern)
            .map_err(|e| Error::Other(format!("bad partial pattern: {e}")))?;
        let mut pages: Vec<(u32, String)> = partial_names
            .iter()
            .filter_map(|name| {
                let captures = page_re.captures(name)?;
                let page: u32 = captures.get(1)?.as_str().parse().ok()?;
                Some((page, name.clone()))
            })
            .collect();
        pages.sort_by_key(|(page, _)| *page);

        if pages.len() != dispatched {
            tracing::error!(
                job_id = job_id.0,
                batch_id = %batch_id,
                expected = dispatched,
                found = pages.len(),
                "Export partial count mismatch, failing the job"
            );
            self.db().update_status(job_id, Status::Failed).await?;
            self.db()
                .set_error(
                    job_id,
                    &format!(
                        "partial count mismatch: expected {dispatched}, found {}",
                        pages.len()
                    ),
                )
                .await?;
            if let Some(batch) = self.queue().find_batch(batch_id).await {
                batch.cancel();
            }
            self.delete_export_partials(batch_id).await;
            self.emit_event(Event::ExportCompleted {
                job_id,
                status: Status::Failed,
            });
            return Err(Error::CollationMismatch {
                expected: dispatched,
                found: pages.len(),
            });
        }

        let mut parts = Vec::with_capacity(pages.len());
        for (_, name) in &pages {
            parts.push(self.artifacts().get(collections::EXPORT_PARTS, name).await?);
        }
        let merged = codec::concat_tables(&parts)?;

        // Persist completion before touching the partials; a retry landing
        // anywhere after the put finds the artifact and skips the merge
        self.artifacts()
            .put(collections::FILES, final_name, &merged)
            .await?;
        self.db().set_filename(job_id, final_name).await?;
        self.db().update_status(job_id, Status::Completed).await?;
        self.db().set_completed(job_id).await?;
        self.delete_export_partials(batch_id).await;
        self.emit_event(Event::ExportCompleted {
            job_id,
            status: Status::Completed,
        });
        tracing::info!(
            job_id = job_id.0,
            batch_id = %batch_id,
            artifact = %final_name,
            partials = pages.len(),
            "Export collated"
        );
        Ok(())
    }
}

struct CollateExportTask {
    engine: DataSync,
    job_id: JobId,
    batch_id: BatchId,
    dispatched: usize,
    final_name: String,
}

#[async_trait]
impl Task for CollateExportTask {
    fn name(&self) -> String {
        format!("collate-export-{}", self.job_id)
    }

    async fn run(&self, _cancel: &CancellationToken) -> Result<()> {
        self.engine
            .collate_export(self.job_id, &self.batch_id, self.dispatched, &self.final_name)
            .await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::NewJob;
    use crate::types::{JobKind, Row};

    async fn engine() -> (tempfile::TempDir, DataSync) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: dir.path().join("jobs.db"),
            artifact_root: dir.path().join("artifacts"),
            work_dir: dir.path().join("work"),
            ..Config::default()
        };
        let engine = DataSync::new(config).await.unwrap();
        (dir, engine)
    }

    async fn export_job(engine: &DataSync, batch_id: &BatchId, total: i64) -> JobId {
        let job_id = engine
            .db()
            .insert_job(&NewJob {
                kind: JobKind::Export,
                owner: None,
                processor: "customers".to_string(),
                filename: None,
                total_rows: total,
            })
            .await
            .unwrap();
        engine
            .db()
            .set_batch_id(job_id, batch_id.as_str())
            .await
            .unwrap();
        engine
            .db()
            .update_status(job_id, Status::InProgress)
            .await
            .unwrap();
        job_id
    }

    fn table(ids: &[u64]) -> Vec<u8> {
        let rows: Vec<Row> = ids
            .iter()
            .map(|id| {
                let mut row = Row::new();
                row.insert(
                    "id".to_string(),
                    serde_json::Value::String(id.to_string()),
                );
                row
            })
            .collect();
        codec::write_rows(&rows).unwrap()
    }

    #[tokio::test]
    async fn repeated_collation_produces_one_final_artifact() {
        let (_dir, engine) = engine().await;
        let batch_id = BatchId::generate();
        let job_id = export_job(&engine, &batch_id, 4).await;

        for (page, ids) in [(1u32, vec![1u64, 2]), (2, vec![3, 4])] {
            engine
                .artifacts()
                .put(
                    collections::EXPORT_PARTS,
                    &format!("export-{batch_id}-{page:05}.csv"),
                    &table(&ids),
                )
                .await
                .unwrap();
        }

        engine
            .collate_export(job_id, &batch_id, 2, "customers_1.csv")
            .await
            .unwrap();
        engine
            .collate_export(job_id, &batch_id, 2, "customers_1.csv")
            .await
            .unwrap();

        let finals = engine
            .artifacts()
            .list(collections::FILES, "customers")
            .await
            .unwrap();
        assert_eq!(finals, vec!["customers_1.csv".to_string()]);
        let partials = engine
            .artifacts()
            .list(collections::EXPORT_PARTS, "export-")
            .await
            .unwrap();
        assert!(partials.is_empty(), "partials swept: {partials:?}");

        let job = engine.db().require_job(job_id).await.unwrap();
        assert_eq!(job.status, Status::Completed);
        assert_eq!(job.filename, Some("customers_1.csv".to_string()));

        let bytes = engine
            .artifacts()
            .get(collections::FILES, "customers_1.csv")
            .await
            .unwrap();
        assert_eq!(codec::read_rows(&bytes).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn retry_after_interrupted_bookkeeping_recovers() {
        // An earlier attempt wrote the final artifact and swept the partials
        // but was cut off before recording completion on the job
        let (_dir, engine) = engine().await;
        let mut events = engine.subscribe();
        let batch_id = BatchId::generate();
        let job_id = export_job(&engine, &batch_id, 4).await;

        engine
            .artifacts()
            .put(collections::FILES, "customers_1.csv", &table(&[1, 2, 3, 4]))
            .await
            .unwrap();

        engine
            .collate_export(job_id, &batch_id, 2, "customers_1.csv")
            .await
            .unwrap();

        let job = engine.db().require_job(job_id).await.unwrap();
        assert_eq!(job.status, Status::Completed);
        assert_eq!(job.filename, Some("customers_1.csv".to_string()));
        assert!(job.completed_at.is_some());

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            Event::ExportCompleted {
                job_id: id,
                status: Status::Completed,
            } if id == job_id
        ));
    }

    #[tokio::test]
    async fn partial_shortfall_without_final_artifact_is_a_mismatch() {
        let (_dir, engine) = engine().await;
        let batch_id = BatchId::generate();
        let job_id = export_job(&engine, &batch_id, 4).await;

        engine
            .artifacts()
            .put(
                collections::EXPORT_PARTS,
                &format!("export-{batch_id}-00001.csv"),
                &table(&[1, 2]),
            )
            .await
            .unwrap();

        let err = engine
            .collate_export(job_id, &batch_id, 2, "customers_1.csv")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CollationMismatch {
                expected: 2,
                found: 1,
            }
        ));

        let job = engine.db().require_job(job_id).await.unwrap();
        assert_eq!(job.status, Status::Failed);
    }
}
