//! In-process task queue with batch settlement
//!
//! Tasks are submitted in batches under an opaque [`BatchId`]. A global
//! semaphore bounds concurrency across all batches; tasks within a batch run
//! in no particular order. Every member finishing (successfully or not)
//! advances the batch's progress watch; once all members have finished the
//! batch settles exactly once, observable through [`BatchHandle::settled`].
//!
//! Failures are allowed by default: a failed member marks the batch degraded
//! without cancelling its siblings. Cancelling a batch skips members that
//! have not started and signals running members through their
//! `CancellationToken`; there is no termination guarantee.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::Result;
use crate::retry::run_with_retry;

/// A unit of work scheduled on the queue
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Short name for logging
    fn name(&self) -> String;

    /// Run the task. The token is an advisory cancellation signal; tasks
    /// should check it at safe points and may finish normally regardless.
    async fn run(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Opaque correlation id for a batch
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BatchId(String);

impl BatchId {
    /// Generate a fresh random batch id
    pub fn generate() -> Self {
        Self(format!(
            "{:016x}{:016x}",
            rand::random::<u64>(),
            rand::random::<u64>()
        ))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BatchId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Options for a batch submission
#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Keep running siblings after a member fails
    pub allow_failures: bool,
    /// Retry policy applied to each member
    pub retry: RetryPolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            allow_failures: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Progress snapshot of a batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchProgress {
    /// Total members in the batch
    pub total: usize,
    /// Members finished (including failures and skipped members)
    pub finished: usize,
    /// Members that failed
    pub failed: usize,
}

struct BatchShared {
    id: BatchId,
    total: usize,
    finished: AtomicUsize,
    failed: AtomicUsize,
    cancel: CancellationToken,
    progress_tx: watch::Sender<BatchProgress>,
    settled_tx: watch::Sender<bool>,
}

impl BatchShared {
    fn snapshot(&self) -> BatchProgress {
        BatchProgress {
            total: self.total,
            finished: self.finished.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Handle to a submitted batch
#[derive(Clone)]
pub struct BatchHandle {
    shared: Arc<BatchShared>,
}

impl BatchHandle {
    /// The batch's correlation id
    pub fn id(&self) -> &BatchId {
        &self.shared.id
    }

    /// Total members in the batch
    pub fn total(&self) -> usize {
        self.shared.total
    }

    /// Members that have failed so far
    pub fn failed(&self) -> usize {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Current progress snapshot
    pub fn progress(&self) -> BatchProgress {
        self.shared.snapshot()
    }

    /// Subscribe to progress updates
    pub fn progress_watch(&self) -> watch::Receiver<BatchProgress> {
        self.shared.progress_tx.subscribe()
    }

    /// Request cancellation: members not yet started are skipped, running
    /// members receive the advisory token signal
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Wait for the batch to settle, returning the final progress
    ///
    /// Settlement happens exactly once; awaiting after settlement returns
    /// immediately.
    pub async fn settled(&self) -> BatchProgress {
        let mut rx = self.shared.settled_tx.subscribe();
        // The sender lives in BatchShared, so wait_for cannot observe a closed channel
        let _ = rx.wait_for(|settled| *settled).await;
        self.shared.snapshot()
    }
}

/// In-process task queue
pub struct TaskQueue {
    permits: Arc<Semaphore>,
    batches: Mutex<HashMap<BatchId, BatchHandle>>,
}

impl TaskQueue {
    /// Create a queue running at most `max_concurrent` tasks at once
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            batches: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a batch of tasks under the given id
    ///
    /// Returns immediately with a handle; members run on background tasks.
    /// An empty batch settles at once.
    pub async fn submit(
        &self,
        id: BatchId,
        tasks: Vec<Arc<dyn Task>>,
        options: BatchOptions,
    ) -> BatchHandle {
        let total = tasks.len();
        let (progress_tx, _) = watch::channel(BatchProgress {
            total,
            ..BatchProgress::default()
        });
        let (settled_tx, _) = watch::channel(total == 0);

        let shared = Arc::new(BatchShared {
            id: id.clone(),
            total,
            finished: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            progress_tx,
            settled_tx,
        });
        let handle = BatchHandle {
            shared: shared.clone(),
        };

        self.batches.lock().await.insert(id, handle.clone());

        if total == 0 {
            return handle;
        }

        let permits = self.permits.clone();
        tokio::spawn(async move {
            let mut members = JoinSet::new();
            for task in tasks {
                let shared = shared.clone();
                let permits = permits.clone();
                let options = options.clone();
                members.spawn(Self::run_member(shared, permits, task, options));
            }
            while members.join_next().await.is_some() {}

            tracing::debug!(
                batch_id = %shared.id,
                failed = shared.failed.load(Ordering::SeqCst),
                total = shared.total,
                "Batch settled"
            );
            let _ = shared.settled_tx.send(true);
        });

        handle
    }

    async fn run_member(
        shared: Arc<BatchShared>,
        permits: Arc<Semaphore>,
        task: Arc<dyn Task>,
        options: BatchOptions,
    ) {
        // Skip members that were cancelled before they could start. Skipped
        // members still count toward settlement.
        let permit = tokio::select! {
            _ = shared.cancel.cancelled() => None,
            permit = permits.acquire_owned() => permit.ok(),
        };

        let started = permit.is_some() && !shared.cancel.is_cancelled();
        if started {
            let _permit = permit;
            let result = run_with_retry(&options.retry, || task.run(&shared.cancel)).await;
            if let Err(e) = result {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    batch_id = %shared.id,
                    task = %task.name(),
                    error = %e,
                    "Batch member failed"
                );
                if !options.allow_failures {
                    shared.cancel.cancel();
                }
            }
        } else {
            tracing::debug!(batch_id = %shared.id, task = %task.name(), "Batch member skipped");
        }

        shared.finished.fetch_add(1, Ordering::SeqCst);
        let _ = shared.progress_tx.send(shared.snapshot());
    }

    /// Look up a live batch by id; unknown ids are simply absent
    pub async fn find_batch(&self, id: &BatchId) -> Option<BatchHandle> {
        self.batches.lock().await.get(id).cloned()
    }
}
