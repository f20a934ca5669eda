//! Structured lifecycle events for triggers, contexts and runs.
//!
//! Events are emitted at `info!` level with an `event` field so they can be
//! filtered and aggregated; use `--json-logs` for machine-readable output.

use tracing::info;

/// Span tagging everything inside one execution context. Attach it to the
/// context future with `tracing::Instrument` so it survives `.await` points.
pub fn context_span(job_name: &str, context: &str) -> tracing::Span {
    tracing::info_span!("matrixci.context", job = %job_name, context = %context)
}

/// Emit event: trigger evaluated for a repository event.
pub fn emit_trigger_evaluated(event_kind: &str, branch: &str, changed: usize, fired: bool) {
    info!(
        event = "trigger.evaluated",
        kind = %event_kind,
        branch = %branch,
        changed_paths = changed,
        fired = fired,
    );
}

/// Emit event: run started for one matrix context.
pub fn emit_run_started(run_id: &str, job_name: &str, context: &str) {
    info!(event = "run.started", run_id = %run_id, job = %job_name, context = %context);
}

/// Emit event: a single event appended to the run.
pub fn emit_event_appended(run_id: &str, event_kind: &str, seq: u64) {
    tracing::debug!(event = "run.event_appended", run_id = %run_id, kind = %event_kind, seq = seq);
}

/// Emit event: context moved to a new state.
pub fn emit_context_transition(run_id: &str, from: &str, to: &str) {
    info!(event = "context.transition", run_id = %run_id, from = %from, to = %to);
}

/// Emit event: run finished with duration, total events, and success status.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, total_events: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        total_events = total_events,
        success = success,
    );
}

/// Emit event: gate evaluated over a recorded run.
pub fn emit_gate_evaluated(run_id: &str, violations: usize, passed: bool) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        violations = violations,
        passed = passed,
    );
}

/// Emit event: run finalization error (warning level).
pub fn emit_run_finalize_error(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.finalize_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_span_create() {
        let span = context_span("typecheck", "python-version=3.9");
        let _entered = span.enter();
        emit_context_transition("run-1", "pending", "checking_out");
    }
}
