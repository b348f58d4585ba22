#![allow(dead_code)]
// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

use data_sync::{
    Config, DataSync, Event, ImportProcessor, QueueSettings, RetryPolicy, Row, RowResult,
};

/// An engine wired to a temp directory, with retries disabled for determinism
pub struct TestEngine {
    pub dir: tempfile::TempDir,
    pub engine: DataSync,
}

pub async fn engine() -> TestEngine {
    engine_with(|_| {}).await
}

pub async fn engine_with(adjust: impl FnOnce(&mut Config)) -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config {
        database_path: dir.path().join("jobs.db"),
        artifact_root: dir.path().join("artifacts"),
        work_dir: dir.path().join("work"),
        queue: QueueSettings {
            export_retry: RetryPolicy::none(),
            import_retry: RetryPolicy::none(),
            collate_retry: RetryPolicy::none(),
            ..QueueSettings::default()
        },
        ..Config::default()
    };
    adjust(&mut config);
    let engine = DataSync::new(config).await.unwrap();
    TestEngine { dir, engine }
}

/// Build a row with `id`, `name`, and `status` columns
pub fn sample_row(id: u64, status: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), serde_json::Value::String(id.to_string()));
    row.insert(
        "name".to_string(),
        serde_json::Value::String(format!("row {id}")),
    );
    row.insert(
        "status".to_string(),
        serde_json::Value::String(status.to_string()),
    );
    row
}

pub fn sample_rows(n: u64) -> Vec<Row> {
    (1..=n).map(|id| sample_row(id, "ok")).collect()
}

/// Write a CSV source file where rows whose 1-based number is in `bad_rows`
/// get status "bad"
pub fn write_source_csv(dir: &std::path::Path, total: u64, bad_rows: &[u64]) -> PathBuf {
    let path = dir.join("source.csv");
    let mut out = String::from("id,name,status\n");
    for id in 1..=total {
        let status = if bad_rows.contains(&id) { "bad" } else { "ok" };
        out.push_str(&format!("{id},row {id},{status}\n"));
    }
    std::fs::write(&path, out).unwrap();
    path
}

/// Processor that rejects rows whose `status` column is "bad"
pub struct StatusProcessor {
    pub chunk_size: Option<usize>,
}

#[async_trait]
impl ImportProcessor for StatusProcessor {
    fn name(&self) -> &str {
        "users"
    }

    fn expected_headers(&self) -> Vec<String> {
        vec!["id".to_string(), "name".to_string(), "status".to_string()]
    }

    fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    fn validate(&self, row: &Row, origin_row: u64) -> RowResult {
        match row.get("status").map(data_sync::codec::flatten_value) {
            Some(status) if status == "bad" => Err(format!("row {origin_row} has bad status")),
            _ => Ok(()),
        }
    }

    async fn process(&self, _row: &Row, _origin_row: u64) -> RowResult {
        Ok(())
    }
}

/// Wait up to ten seconds for an event matching the predicate
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<Event>, mut matches: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll a condition until it holds, failing after ten seconds
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}
