//! Storage trait definitions for matrixci
//!
//! `RunLedger` persists one execution context per run: its metadata, the
//! ordered step events and a final summary. Implementations are async and
//! backend-agnostic; an in-memory fake lives in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private so the string is always lowercase hex
/// produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RunLedger
// ---------------------------------------------------------------------------

/// Unique identifier for an execution run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata attached to a run at creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Revision the context was checked out at
    pub git_sha: Option<String>,
    /// Workflow (job) name
    pub job_name: String,
    /// Matrix entry label, e.g. `python-version=3.9`
    pub context_label: String,
    /// Arbitrary key-value tags
    pub tags: serde_json::Value,
}

/// A single event in an execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic sequence number within the run
    pub seq: u64,
    /// Event kind (e.g. "step_started", "step_failed")
    pub kind: String,
    /// Event payload
    pub payload: serde_json::Value,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// Summary produced when a run completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total events recorded
    pub total_events: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Whether the run succeeded
    pub success: bool,
    /// Name of the step that failed, if any
    pub failed_step: Option<String>,
}

/// Status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Full run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub spec_digest: ContentDigest,
    pub metadata: RunMetadata,
    pub status: RunStatus,
    pub summary: Option<RunSummary>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Execution run ledger.
///
/// Guarantees:
/// - Events are ordered by monotonic `seq` within a run.
/// - A run transitions: Running → Completed | Failed | Cancelled (terminal).
/// - Terminal runs are immutable.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Create a new run, returning its unique ID.
    async fn create_run(
        &self,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<RunId>;

    /// Append an event to an active run. Fails if the run is terminal.
    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()>;

    /// Mark a run as completed with a summary.
    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Mark a run as failed with a summary.
    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Mark a run as cancelled.
    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Retrieve all events for a run, ordered by seq.
    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>>;

    /// List runs, optionally filtered by job name. Newest first.
    async fn list_runs(&self, job_name: Option<&str>) -> StorageResult<Vec<RunRecord>>;
}

/// Check that `status` allows further mutation.
pub(crate) fn ensure_running(run_id: &RunId, status: &RunStatus) -> StorageResult<()> {
    if *status != RunStatus::Running {
        return Err(StorageError::InvalidRunState {
            run_id: run_id.0.clone(),
            status: format!("{:?}", status),
            expected: "Running".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_lowercase_hex() {
        let d = ContentDigest::from_bytes(b"matrixci");
        assert_eq!(d.as_str().len(), 64);
        assert!(d.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d.short().len(), 12);
    }

    #[test]
    fn digest_try_from_rejects_garbage() {
        assert!(ContentDigest::try_from("xyz".to_string()).is_err());
        let upper = "A".repeat(64);
        let d = ContentDigest::try_from(upper).unwrap();
        assert_eq!(d.as_str(), "a".repeat(64));
    }

    #[test]
    fn digest_deserialize_validates() {
        let bad: Result<ContentDigest, _> = serde_json::from_str("\"nothex\"");
        assert!(bad.is_err());
    }
}
