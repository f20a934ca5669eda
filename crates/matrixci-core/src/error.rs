//! Error taxonomy for workflow loading, matrix expansion and git access.

use std::path::PathBuf;

/// Core matrixci errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to read workflow {path}: {source}")]
    WorkflowRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workflow: {0}")]
    WorkflowParse(#[from] serde_yaml::Error),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("unknown matrix key '{key}' referenced in '{text}'")]
    UnknownMatrixKey { key: String, text: String },

    #[error("invalid context transition: {current} -> {requested}")]
    InvalidTransition { current: String, requested: String },

    #[error("invalid setting {name}={value}: {reason}")]
    InvalidSetting {
        name: String,
        value: String,
        reason: String,
    },

    #[error("git error: {0}")]
    Git(String),

    #[error("storage error: {0}")]
    Storage(#[from] matrixci_state::StorageError),
}

/// Convenience result type for matrixci-core.
pub type Result<T> = std::result::Result<T, CoreError>;
