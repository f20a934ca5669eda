//! Execution context: one matrix entry run fail-fast and recorded as a ledger run.

use std::sync::Arc;
use std::time::Instant;

use matrixci_core::{
    obs, ContextState, CoreError, FailureKind, MatrixEntry, RecordedKind, RunRecorder,
};
use matrixci_state::{RunLedger, RunMetadata, RunSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{CiError, Result};
use crate::runner::{tail, ExecEnv, FailureCause, StepExecutor, StepResult};
use crate::spec::JobSpec;
use crate::step::StepConfig;

/// Bytes of step output kept in ledger events.
const OUTPUT_TAIL_BYTES: usize = 8 * 1024;

/// Result of one execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResult {
    /// Ledger run ID.
    pub run_id: String,

    /// Matrix entry this context ran.
    pub entry: MatrixEntry,

    /// Terminal state.
    pub state: ContextState,

    /// Results of executed steps, in order.
    pub steps: Vec<StepResult>,

    /// Steps not executed because an earlier step failed.
    pub skipped: Vec<String>,

    pub duration_ms: u64,

    pub spec_digest: String,
}

impl ContextResult {
    pub fn succeeded(&self) -> bool {
        self.state == ContextState::Succeeded
    }

    pub fn label(&self) -> String {
        self.entry.label()
    }

    /// Failing step name and failure kind.
    pub fn failure(&self) -> Option<(&str, FailureKind)> {
        match &self.state {
            ContextState::Failed { step, kind } => Some((step.as_str(), *kind)),
            _ => None,
        }
    }

    /// Result of the failing step.
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.passed())
    }

    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.passed()).count()
    }
}

/// Runs the steps of one context.
pub struct ExecutionContext;

impl ExecutionContext {
    /// Execute `steps` in order and record the context as a ledger run.
    ///
    /// Each executed step produces `step_started` followed by
    /// `step_succeeded` or `step_failed`; every state change produces
    /// `state_changed`. After the first failure the remaining steps are
    /// recorded as `step_skipped` and never executed.
    ///
    /// The run is finalized as Completed when the context succeeds and
    /// Failed otherwise.
    pub async fn run(
        ledger: Arc<dyn RunLedger>,
        executor: Arc<dyn StepExecutor>,
        spec: &JobSpec,
        entry: &MatrixEntry,
        steps: &[StepConfig],
        env: &ExecEnv,
    ) -> Result<ContextResult> {
        check_phase_order(steps)?;
        let start = Instant::now();

        let spec_digest = spec.digest();
        let metadata = RunMetadata {
            git_sha: spec.git_sha.clone(),
            job_name: spec.job_name.clone(),
            context_label: spec.context_label.clone(),
            tags: json!({
                "matrix": &entry.values,
                "index": entry.index,
                "steps": steps.iter().map(|s| &s.name).collect::<Vec<_>>(),
                "work_dir": env.work_dir.to_string_lossy(),
            }),
        };

        let mut recorder = RunRecorder::start(ledger, &spec_digest, metadata).await?;
        let run_id = recorder.run_id().0.clone();

        info!(run_id = %run_id, steps = steps.len(), "Starting execution context");

        let executed = execute_steps(&mut recorder, executor.as_ref(), steps, env).await;
        let Executed {
            state,
            results,
            skipped,
        } = match executed {
            Ok(executed) => executed,
            Err(e) => {
                abandon(recorder, start, &e).await;
                return Err(e);
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = state == ContextState::Succeeded;
        let summary = RunSummary {
            total_events: recorder.event_count(),
            duration_ms,
            success,
            failed_step: results
                .iter()
                .find(|r| !r.passed())
                .map(|r| r.step_name.clone()),
        };

        if success {
            recorder.finish_ok(summary).await?;
            info!(run_id = %run_id, "Execution context succeeded");
        } else {
            recorder.finish_err(summary).await?;
            info!(run_id = %run_id, state = %state, "Execution context failed");
        }

        Ok(ContextResult {
            run_id,
            entry: entry.clone(),
            state,
            steps: results,
            skipped,
            duration_ms,
            spec_digest: spec_digest.to_string(),
        })
    }
}

/// Steps as executed by one context.
struct Executed {
    state: ContextState,
    results: Vec<StepResult>,
    skipped: Vec<String>,
}

async fn execute_steps(
    recorder: &mut RunRecorder,
    executor: &dyn StepExecutor,
    steps: &[StepConfig],
    env: &ExecEnv,
) -> Result<Executed> {
    let mut state = ContextState::Pending;
    let mut results = Vec::new();
    let mut skipped = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        if let ContextState::Failed { step: failed, .. } = &state {
            recorder
                .record(
                    RecordedKind::StepSkipped,
                    json!({
                        "step": &step.name,
                        "index": index,
                        "after": failed,
                    }),
                )
                .await?;
            skipped.push(step.name.clone());
            continue;
        }

        let next = ContextState::for_step(step.phase, &step.target);
        if next != state {
            state = advance(recorder, &state, next).await?;
        }

        info!(step = %step.name, phase = %step.phase, "Executing step");
        recorder
            .record(
                RecordedKind::StepStarted,
                json!({
                    "step": &step.name,
                    "index": index,
                    "phase": step.phase,
                    "command": step.command.describe(),
                    "timeout_secs": step.timeout_secs,
                }),
            )
            .await?;

        let step_start = Instant::now();
        let result = match executor.execute(step, env).await {
            Ok(r) => r,
            Err(e) => {
                warn!(step = %step.name, error = %e, "Step did not produce an exit status");
                StepResult::errored(&step.name, &e, step_start.elapsed().as_millis() as u64)
            }
        };

        if result.passed() {
            recorder
                .record(
                    RecordedKind::StepSucceeded,
                    json!({
                        "step": &step.name,
                        "exit_code": result.exit_code,
                        "duration_ms": result.duration_ms,
                        "stdout": tail(&result.stdout, OUTPUT_TAIL_BYTES),
                    }),
                )
                .await?;
        } else {
            let kind = FailureKind::for_phase(step.phase);
            let cause = result.cause.clone().unwrap_or(FailureCause::NonZeroExit {
                code: result.exit_code,
            });
            recorder
                .record(
                    RecordedKind::StepFailed,
                    json!({
                        "step": &step.name,
                        "exit_code": result.exit_code,
                        "duration_ms": result.duration_ms,
                        "failure_kind": kind,
                        "cause": &cause,
                        "error": format!("Step '{}' {}", step.name, cause),
                        "stdout": tail(&result.stdout, OUTPUT_TAIL_BYTES),
                        "stderr": tail(&result.stderr, OUTPUT_TAIL_BYTES),
                    }),
                )
                .await?;
            state = advance(
                recorder,
                &state,
                ContextState::Failed {
                    step: step.name.clone(),
                    kind,
                },
            )
            .await?;
        }
        results.push(result);
    }

    if !state.is_terminal() {
        state = advance(recorder, &state, ContextState::Succeeded).await?;
    }

    Ok(Executed {
        state,
        results,
        skipped,
    })
}

/// Mark the run Failed after recording broke off, so it does not stay Running.
async fn abandon(recorder: RunRecorder, start: Instant, cause: &CiError) {
    let run_id = recorder.run_id().0.clone();
    warn!(run_id = %run_id, error = %cause, "Execution context aborted");
    let summary = RunSummary {
        total_events: recorder.event_count(),
        duration_ms: start.elapsed().as_millis() as u64,
        success: false,
        failed_step: None,
    };
    if let Err(e) = recorder.finish_err(summary).await {
        obs::emit_run_finalize_error(&run_id, &e);
    }
}

/// Validate a transition, record it and return the new state.
async fn advance(
    recorder: &mut RunRecorder,
    current: &ContextState,
    next: ContextState,
) -> Result<ContextState> {
    let next = current.transition(next)?;
    recorder
        .record(
            RecordedKind::StateChanged,
            json!({
                "from": current.to_string(),
                "to": next.to_string(),
                "state": &next,
            }),
        )
        .await?;
    obs::emit_context_transition(
        recorder.run_id().0.as_str(),
        &current.to_string(),
        &next.to_string(),
    );
    Ok(next)
}

fn check_phase_order(steps: &[StepConfig]) -> Result<()> {
    if steps.is_empty() {
        return Err(CoreError::InvalidWorkflow("context has no steps".to_string()).into());
    }
    for pair in steps.windows(2) {
        if pair[1].phase < pair[0].phase {
            return Err(CoreError::InvalidWorkflow(format!(
                "step '{}' ({}) cannot follow a {} step",
                pair[1].name, pair[1].phase, pair[0].phase
            ))
            .into());
        }
    }
    Ok(())
}
