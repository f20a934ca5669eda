//! Human and machine readable job reports.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use matrixci_core::FailureKind;
use serde::{Deserialize, Serialize};

use crate::context::ContextResult;
use crate::job::JobOutcome;
use crate::runner::FailureCause;

/// Per-context line of a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextReport {
    pub label: String,
    pub matrix: BTreeMap<String, String>,
    pub run_id: String,
    pub state: String,
    pub succeeded: bool,
    pub steps_passed: usize,
    pub steps_total: usize,
    pub failed_step: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub cause: Option<FailureCause>,
    pub skipped: Vec<String>,
    pub duration_ms: u64,
}

impl ContextReport {
    fn from_result(result: &ContextResult) -> Self {
        let (failed_step, failure_kind) = match result.failure() {
            Some((step, kind)) => (Some(step.to_string()), Some(kind)),
            None => (None, None),
        };
        Self {
            label: result.label(),
            matrix: result.entry.values.clone(),
            run_id: result.run_id.clone(),
            state: result.state.to_string(),
            succeeded: result.succeeded(),
            steps_passed: result.passed_count(),
            steps_total: result.steps.len() + result.skipped.len(),
            failed_step,
            failure_kind,
            cause: result.failed_step().and_then(|s| s.cause.clone()),
            skipped: result.skipped.clone(),
            duration_ms: result.duration_ms,
        }
    }
}

/// Summary of a job outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobReport {
    pub workflow: String,
    pub triggered: bool,
    pub success: bool,
    /// Why the job did not trigger.
    pub skip_reason: Option<String>,
    pub job_id: Option<String>,
    pub revision: Option<String>,
    pub contexts: Vec<ContextReport>,
    pub duration_ms: u64,
}

impl JobReport {
    pub fn new(workflow: &str, outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::NotTriggered { reason } => Self {
                workflow: workflow.to_string(),
                triggered: false,
                success: true,
                skip_reason: Some(reason.to_string()),
                job_id: None,
                revision: None,
                contexts: Vec::new(),
                duration_ms: 0,
            },
            JobOutcome::Completed(result) => Self {
                workflow: workflow.to_string(),
                triggered: true,
                success: result.success(),
                skip_reason: None,
                job_id: Some(result.job_id.clone()),
                revision: result.revision.clone(),
                contexts: result
                    .contexts
                    .iter()
                    .map(ContextReport::from_result)
                    .collect(),
                duration_ms: result.duration_ms,
            },
        }
    }

    pub fn failed_count(&self) -> usize {
        self.contexts.iter().filter(|c| !c.succeeded).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if !self.triggered {
            let reason = self.skip_reason.as_deref().unwrap_or("trigger did not fire");
            let _ = writeln!(out, "{}: not triggered ({})", self.workflow, reason);
            return out;
        }

        let _ = writeln!(
            out,
            "{} @ {}",
            self.workflow,
            self.revision.as_deref().unwrap_or("(working tree)")
        );
        for ctx in &self.contexts {
            if ctx.succeeded {
                let _ = writeln!(
                    out,
                    "  ✓ {}  {}/{} steps  {} ms",
                    ctx.label, ctx.steps_passed, ctx.steps_total, ctx.duration_ms
                );
                continue;
            }
            let step = ctx.failed_step.as_deref().unwrap_or("?");
            let kind = ctx
                .failure_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let _ = write!(out, "  ✗ {}  {} failure in '{}'", ctx.label, kind, step);
            if let Some(cause) = &ctx.cause {
                let _ = write!(out, " ({})", cause);
            }
            if !ctx.skipped.is_empty() {
                let _ = write!(out, ", skipped {}", ctx.skipped.len());
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "      run {}", ctx.run_id);
        }

        if self.success {
            let _ = writeln!(out, "Result: PASSED ({} contexts)", self.contexts.len());
        } else {
            let _ = writeln!(
                out,
                "Result: FAILED ({} of {} contexts failed)",
                self.failed_count(),
                self.contexts.len()
            );
        }
        out
    }
}
