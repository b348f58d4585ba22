//! Row sources for exports

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Row;

/// Supplier of rows for an export job
///
/// Pages are 1-based. Implementations should return stable results for the
/// duration of a job; page tasks may fetch pages in any order and may retry.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Total number of rows available
    async fn count(&self) -> Result<u64>;

    /// Fetch page `page` of size `per_page` (1-based; the last page may be short)
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<Row>>;
}

/// In-memory row source
///
/// Useful for tests and for exporting already-materialized datasets.
pub struct MemoryRowSource {
    rows: Vec<Row>,
}

impl MemoryRowSource {
    /// Create a source over the given rows
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    async fn count(&self) -> Result<u64> {
        Ok(self.rows.len() as u64)
    }

    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<Row>> {
        let start = (page.saturating_sub(1) as usize) * per_page as usize;
        if start >= self.rows.len() {
            return Ok(Vec::new());
        }
        let end = (start + per_page as usize).min(self.rows.len());
        Ok(self.rows[start..end].to_vec())
    }
}
