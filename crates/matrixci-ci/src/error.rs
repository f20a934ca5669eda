//! Infrastructure errors for job execution.
//!
//! A failing step is not an error: it is reported through `ContextResult`.
//! `CiError` covers problems that prevent a job from being run or recorded.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error(transparent)]
    Core(#[from] matrixci_core::CoreError),

    #[error("ledger error: {0}")]
    Storage(#[from] matrixci_state::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("context task for '{context}' aborted: {reason}")]
    ContextAborted { context: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CiError>;
