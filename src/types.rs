//! Core types for data-sync

use serde::{Deserialize, Serialize};

/// A single tabular row: column name to JSON value.
///
/// Import workers read rows from CSV (all values arrive as strings); export
/// row sources may yield any JSON value, with composite values flattened to
/// their JSON text on serialization.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a job record
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Create a new JobId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<JobId> for i64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Kind of work a job record tracks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Bulk import of an uploaded tabular file
    Import,
    /// Bulk export of a row source to a tabular file
    Export,
}

impl JobKind {
    /// Canonical string form stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Export => "export",
        }
    }

    /// Parse the canonical string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(JobKind::Import),
            "export" => Some(JobKind::Export),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobKind {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <&str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobKind {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobKind {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        JobKind::parse(raw).ok_or_else(|| format!("unknown job kind {raw:?}").into())
    }
}

/// Job lifecycle status
///
/// ```text
/// Pending -> InProgress -> { Completed | Failed | Stopping }
/// Stopping -> Stopped
/// ```
///
/// Only canonical lowercase strings are accepted at the persistence boundary;
/// decoding an unknown value is an error rather than a silent fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, not yet picked up by workers
    Pending,
    /// Batch tasks are running
    InProgress,
    /// Finished successfully (row-level failures may still be reported)
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Cancellation requested, workers winding down
    Stopping,
    /// Cancelled and settled
    Stopped,
}

impl Status {
    /// Canonical string form stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
        }
    }

    /// Parse the canonical string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Status::Pending),
            "in_progress" => Some(Status::InProgress),
            "completed" => Some(Status::Completed),
            "failed" => Some(Status::Failed),
            "stopping" => Some(Status::Stopping),
            "stopped" => Some(Status::Stopped),
            _ => None,
        }
    }

    /// Whether this status is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Stopped)
    }

    /// Whether a cancel request has been observed
    pub fn is_stop_requested(&self) -> bool {
        matches!(self, Status::Stopping | Status::Stopped)
    }

    /// Lifecycle transition table. Same-state updates are allowed as no-ops.
    pub fn can_transition_to(&self, next: Status) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Status::Pending => matches!(
                next,
                Status::InProgress
                    | Status::Completed
                    | Status::Failed
                    | Status::Stopping
                    | Status::Stopped
            ),
            Status::InProgress => matches!(
                next,
                Status::Completed | Status::Failed | Status::Stopping | Status::Stopped
            ),
            Status::Stopping => matches!(next, Status::Stopped | Status::Failed),
            Status::Completed | Status::Failed | Status::Stopped => false,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Sqlite> for Status {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <&str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for Status {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for Status {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Status::parse(raw).ok_or_else(|| format!("unknown status {raw:?}").into())
    }
}

/// A row that failed validation or processing during an import
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedRow {
    /// Original row content
    pub row: Row,
    /// 1-based data row number in the source file
    pub origin_row: u64,
    /// Error message captured from validation or processing
    pub error: String,
}

/// Event emitted during job lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Import pipeline picked up a job and began dispatching chunks
    ImportStarted {
        /// Job ID
        job_id: JobId,
    },

    /// Import job settled (completed, failed, or stopped)
    ImportCompleted {
        /// Job ID
        job_id: JobId,
        /// Final status of the record
        status: Status,
    },

    /// Export job settled (completed, failed, or stopped)
    ExportCompleted {
        /// Job ID
        job_id: JobId,
        /// Final status of the record
        status: Status,
    },

    /// A batch member finished (successfully or not)
    RunProgressed {
        /// Job ID
        job_id: JobId,
        /// Members finished so far (including failures)
        finished: usize,
        /// Members failed so far
        failed: usize,
        /// Total members in the batch
        total: usize,
    },

    /// All batch members finished
    RunSettled {
        /// Job ID
        job_id: JobId,
        /// Members that failed
        failed: usize,
        /// Total members in the batch
        total: usize,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_canonical_strings() {
        for status in [
            Status::Pending,
            Status::InProgress,
            Status::Completed,
            Status::Failed,
            Status::Stopping,
            Status::Stopped,
        ] {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn status_rejects_non_canonical_strings() {
        assert_eq!(Status::parse("PENDING"), None);
        assert_eq!(Status::parse("in-progress"), None);
        assert_eq!(Status::parse(""), None);
        assert_eq!(Status::parse("FAILED"), None);
    }

    #[test]
    fn pending_transitions() {
        assert!(Status::Pending.can_transition_to(Status::InProgress));
        assert!(Status::Pending.can_transition_to(Status::Completed));
        assert!(Status::Pending.can_transition_to(Status::Stopped));
        assert!(Status::Pending.can_transition_to(Status::Pending));
    }

    #[test]
    fn in_progress_transitions() {
        assert!(Status::InProgress.can_transition_to(Status::Completed));
        assert!(Status::InProgress.can_transition_to(Status::Failed));
        assert!(Status::InProgress.can_transition_to(Status::Stopping));
        assert!(Status::InProgress.can_transition_to(Status::Stopped));
        assert!(!Status::InProgress.can_transition_to(Status::Pending));
    }

    #[test]
    fn stopping_transitions() {
        assert!(Status::Stopping.can_transition_to(Status::Stopped));
        assert!(Status::Stopping.can_transition_to(Status::Failed));
        assert!(!Status::Stopping.can_transition_to(Status::Completed));
        assert!(!Status::Stopping.can_transition_to(Status::InProgress));
    }

    #[test]
    fn terminal_states_admit_no_transitions() {
        for terminal in [Status::Completed, Status::Failed, Status::Stopped] {
            assert!(terminal.is_terminal());
            for next in [
                Status::Pending,
                Status::InProgress,
                Status::Completed,
                Status::Failed,
                Status::Stopping,
                Status::Stopped,
            ] {
                if next != terminal {
                    assert!(
                        !terminal.can_transition_to(next),
                        "{terminal} should not move to {next}"
                    );
                }
            }
        }
    }

    #[test]
    fn job_id_display_and_parse() {
        let id = JobId::new(17);
        assert_eq!(id.to_string(), "17");
        assert_eq!("17".parse::<JobId>().unwrap(), id);
        assert_eq!(i64::from(id), 17);
    }

    #[test]
    fn job_kind_round_trips() {
        assert_eq!(JobKind::parse("import"), Some(JobKind::Import));
        assert_eq!(JobKind::parse("export"), Some(JobKind::Export));
        assert_eq!(JobKind::parse("other"), None);
        assert_eq!(JobKind::Export.as_str(), "export");
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::RunProgressed {
            job_id: JobId(3),
            finished: 2,
            failed: 1,
            total: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run_progressed");
        assert_eq!(json["job_id"], 3);
        assert_eq!(json["finished"], 2);
    }
}
