//! matrixci CI - matrix job execution
//!
//! Runs a triggered workflow as independent execution contexts:
//! - Resolves steps per matrix entry
//! - Executes them fail-fast through a `StepExecutor`
//! - Records every context as a ledger run
//! - Evaluates recorded runs through a gate

pub mod context;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod job;
pub mod report;
pub mod runner;
pub mod spec;
pub mod step;

// Re-export key types
pub use context::{ContextResult, ExecutionContext};
pub use error::{CiError, Result};
pub use gate::{GateVerdict, StepGate};
pub use job::{JobOutcome, JobRequest, JobResult, JobRunner};
pub use report::{ContextReport, JobReport};
pub use runner::{ExecEnv, ExecError, FailureCause, ProcessExecutor, StepExecutor, StepResult};
pub use spec::JobSpec;
pub use step::{resolve_steps, StepCommand, StepConfig};
