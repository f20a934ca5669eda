//! Step configuration resolved for one matrix context.

use std::collections::BTreeMap;

use matrixci_core::{MatrixEntry, Phase, Result, StepDef, Workflow};
use serde::{Deserialize, Serialize};

/// What a step executes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCommand {
    /// Clone the repository at the triggering revision into the work dir.
    Checkout,
    /// Shell script run with `sh -c`.
    Shell { script: String },
}

impl StepCommand {
    /// Display form used in logs and digests.
    pub fn describe(&self) -> String {
        match self {
            StepCommand::Checkout => "checkout".to_string(),
            StepCommand::Shell { script } => script.clone(),
        }
    }
}

/// Configuration for a step inside one context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepConfig {
    /// Step name after matrix interpolation.
    pub name: String,

    pub phase: Phase,

    /// Label used for the `TypeChecking` state.
    pub target: String,

    pub command: StepCommand,

    /// Extra environment (matrix variables plus step `env`).
    pub env: BTreeMap<String, String>,

    /// Timeout in seconds; 0 disables it.
    pub timeout_secs: u64,

    /// Directory relative to the context work dir.
    pub working_directory: Option<String>,
}

impl StepConfig {
    /// Resolve a declared step against a matrix entry.
    pub fn resolve(def: &StepDef, entry: &MatrixEntry, default_timeout_secs: u64) -> Result<Self> {
        let name = entry.interpolate(&def.name)?;
        let phase = def.effective_phase().ok_or_else(|| {
            matrixci_core::CoreError::InvalidWorkflow(format!("step '{}' has no phase", def.name))
        })?;
        let command = match (&def.uses, &def.run) {
            (Some(_), _) => StepCommand::Checkout,
            (None, Some(run)) => StepCommand::Shell {
                script: entry.interpolate(run)?,
            },
            (None, None) => {
                return Err(matrixci_core::CoreError::InvalidWorkflow(format!(
                    "step '{}' has nothing to run",
                    def.name
                )))
            }
        };
        let target = match &def.target {
            Some(t) => entry.interpolate(t)?,
            None => name.clone(),
        };

        let mut env = entry.env_vars();
        for (k, v) in &def.env {
            env.insert(k.clone(), entry.interpolate(v)?);
        }

        let working_directory = def
            .working_directory
            .as_deref()
            .map(|d| entry.interpolate(d))
            .transpose()?;

        Ok(Self {
            name,
            phase,
            target,
            command,
            env,
            timeout_secs: def.timeout_secs.unwrap_or(default_timeout_secs),
            working_directory,
        })
    }

    /// Create a shell step (tests and ad-hoc jobs).
    pub fn shell(name: impl Into<String>, phase: Phase, script: impl Into<String>, timeout_secs: u64) -> Self {
        let name = name.into();
        Self {
            target: name.clone(),
            name,
            phase,
            command: StepCommand::Shell {
                script: script.into(),
            },
            env: BTreeMap::new(),
            timeout_secs,
            working_directory: None,
        }
    }

    /// Set the type-check target label.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }
}

/// Resolve every step of `workflow` for `entry`, in declaration order.
pub fn resolve_steps(
    workflow: &Workflow,
    entry: &MatrixEntry,
    default_timeout_secs: u64,
) -> Result<Vec<StepConfig>> {
    workflow
        .steps
        .iter()
        .map(|def| StepConfig::resolve(def, entry, default_timeout_secs))
        .collect()
}
