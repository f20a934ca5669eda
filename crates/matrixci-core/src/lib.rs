//! matrixci core library
//!
//! Workflow model and the pure decision logic of a matrix CI job:
//! - Loading and validating workflow YAML
//! - Deciding whether a repository event triggers the job
//! - Expanding the version matrix into independent contexts
//! - The execution-context lifecycle and failure taxonomy

pub mod config;
pub mod error;
pub mod git;
pub mod lifecycle;
pub mod matrix;
pub mod obs;
pub mod pattern;
pub mod recording;
pub mod telemetry;
pub mod trigger;
pub mod workflow;

pub use config::Settings;
pub use error::{CoreError, Result};
pub use git::{capture_head_sha, changed_paths, current_branch, is_git_repo};
pub use lifecycle::{ContextState, FailureKind};
pub use matrix::{MatrixEntry, MatrixExpander};
pub use pattern::Pattern;
pub use recording::{RecordedKind, RunRecorder};
pub use telemetry::init_tracing;
pub use trigger::{EventKind, RepoEvent, SkipReason, TriggerDecision, TriggerEvaluator};
pub use workflow::{EventFilter, Matrix, MatrixValue, Phase, StepDef, Strategy, Triggers, Workflow};
