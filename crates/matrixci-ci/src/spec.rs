//! Job identity.
//!
//! A `JobSpec` names one execution context of a workflow: which commands
//! it runs, with which matrix values, at which revision. Its digest links
//! ledger runs of the same configuration.

use std::collections::BTreeMap;

use matrixci_core::MatrixEntry;
use matrixci_state::ContentDigest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::step::StepConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    /// Workflow name.
    pub job_name: String,

    /// Matrix label of the context.
    pub context_label: String,

    /// Matrix values of the context.
    pub matrix: BTreeMap<String, String>,

    /// SHA-256 digest of the ordered, interpolated step commands.
    pub steps_digest: String,

    /// Revision the context runs against.
    pub git_sha: Option<String>,
}

impl JobSpec {
    pub fn new(
        job_name: &str,
        entry: &MatrixEntry,
        steps: &[StepConfig],
        git_sha: Option<String>,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            context_label: entry.label(),
            matrix: entry.values.clone(),
            steps_digest: compute_steps_digest(steps),
            git_sha,
        }
    }

    /// Digest used as the ledger `spec_digest`.
    pub fn digest(&self) -> ContentDigest {
        let mut hasher = Sha256::new();
        hasher.update(self.job_name.as_bytes());
        hasher.update(b"\0");
        for (key, value) in &self.matrix {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(self.steps_digest.as_bytes());
        hasher.update(b"\0");
        if let Some(sha) = &self.git_sha {
            hasher.update(sha.as_bytes());
        }
        ContentDigest::from_bytes(&hasher.finalize())
    }
}

/// Deterministic digest of ordered step names and commands.
fn compute_steps_digest(steps: &[StepConfig]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(step.command.describe().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
