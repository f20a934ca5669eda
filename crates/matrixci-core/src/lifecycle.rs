//! Execution-context lifecycle.
//!
//! `Pending → CheckingOut → Provisioning → Installing → TypeChecking → Succeeded | Failed`
//!
//! Phases only move forward; consecutive steps of one phase stay in the
//! same state. `Failed` is reachable from any non-terminal state and both
//! terminal states reject further transitions.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::workflow::Phase;

/// Failure taxonomy for a context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The environment could not be created (checkout or interpreter).
    Provisioning,
    /// Dependency resolution or install error.
    Installation,
    /// The checker reported violations or crashed.
    TypeCheck,
}

impl FailureKind {
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Checkout | Phase::Provision => FailureKind::Provisioning,
            Phase::Install => FailureKind::Installation,
            Phase::Typecheck => FailureKind::TypeCheck,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Provisioning => "provisioning",
            FailureKind::Installation => "installation",
            FailureKind::TypeCheck => "type_check",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one execution context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContextState {
    Pending,
    CheckingOut,
    Provisioning,
    Installing,
    TypeChecking { target: String },
    Succeeded,
    Failed { step: String, kind: FailureKind },
}

impl ContextState {
    /// State entered when a step of `phase` starts.
    pub fn for_step(phase: Phase, target: &str) -> Self {
        match phase {
            Phase::Checkout => ContextState::CheckingOut,
            Phase::Provision => ContextState::Provisioning,
            Phase::Install => ContextState::Installing,
            Phase::Typecheck => ContextState::TypeChecking {
                target: target.to_string(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContextState::Succeeded | ContextState::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContextState::Pending => "pending",
            ContextState::CheckingOut => "checking_out",
            ContextState::Provisioning => "provisioning",
            ContextState::Installing => "installing",
            ContextState::TypeChecking { .. } => "type_checking",
            ContextState::Succeeded => "succeeded",
            ContextState::Failed { .. } => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ContextState::Pending => 0,
            ContextState::CheckingOut => 1,
            ContextState::Provisioning => 2,
            ContextState::Installing => 3,
            ContextState::TypeChecking { .. } => 4,
            ContextState::Succeeded | ContextState::Failed { .. } => 5,
        }
    }

    /// Validate and perform a transition.
    pub fn transition(&self, next: ContextState) -> Result<ContextState> {
        let allowed = match (self, &next) {
            _ if self.is_terminal() => false,
            (_, ContextState::Failed { .. }) => true,
            (ContextState::Pending, ContextState::Succeeded) => false,
            (_, ContextState::Succeeded) => true,
            _ if self.rank() > 0 && next.rank() == self.rank() => true,
            _ => next.rank() > self.rank(),
        };
        if !allowed {
            return Err(CoreError::InvalidTransition {
                current: self.to_string(),
                requested: next.to_string(),
            });
        }
        Ok(next)
    }
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextState::TypeChecking { target } => write!(f, "type_checking({})", target),
            ContextState::Failed { step, kind } => write!(f, "failed({}: {})", kind, step),
            other => f.write_str(other.name()),
        }
    }
}
