//! Error types for matrixci-state

use thiserror::Error;

/// Errors produced by run ledger backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Run does not exist in the ledger
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Run ID is not a single path component
    #[error("invalid run id: {run_id:?}")]
    InvalidRunId { run_id: String },

    /// Operation requires a different run status
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// Event sequence numbers must increase within a run
    #[error("out-of-order event for run {run_id}: seq {seq} after {last}")]
    OutOfOrderEvent { run_id: String, seq: u64, last: u64 },

    /// String is not a valid SHA-256 hex digest
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
