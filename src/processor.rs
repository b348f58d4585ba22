//! Import processor traits and registry

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Row;

/// Per-row outcome of validation or processing
///
/// The error string is captured verbatim into the failure report.
pub type RowResult = std::result::Result<(), String>;

/// Domain logic for one kind of import
///
/// A processor declares the headers it needs, how many rows each chunk task
/// should take, and how individual rows are validated and applied. Row
/// failures are data problems, not pipeline problems: they are collected into
/// the failure report and never fail the chunk task.
#[async_trait]
pub trait ImportProcessor: Send + Sync {
    /// Identifier the processor registers under (stored on the job record)
    fn name(&self) -> &str;

    /// Headers the source file must carry (extra columns are allowed)
    fn expected_headers(&self) -> Vec<String>;

    /// Rows per chunk task; `None` uses the configured default
    fn chunk_size(&self) -> Option<usize> {
        None
    }

    /// Cheap synchronous validation of a row before processing
    fn validate(&self, row: &Row, origin_row: u64) -> RowResult;

    /// Apply a validated row
    async fn process(&self, row: &Row, origin_row: u64) -> RowResult;
}

/// Registry of import processors keyed by identifier
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn ImportProcessor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under its own name, replacing any previous entry
    pub fn register(&mut self, processor: Arc<dyn ImportProcessor>) {
        self.processors
            .insert(processor.name().to_string(), processor);
    }

    /// Look up a processor by identifier
    pub fn get(&self, name: &str) -> Option<Arc<dyn ImportProcessor>> {
        self.processors.get(name).cloned()
    }

    /// Registered identifiers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.keys().cloned().collect();
        names.sort();
        names
    }
}
