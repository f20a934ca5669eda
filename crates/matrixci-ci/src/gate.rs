//! Gate evaluation over a recorded context run.

use std::collections::BTreeSet;

use matrixci_state::RunEvent;
use serde::{Deserialize, Serialize};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Steps recorded as skipped after a failure.
    pub skipped: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Re-derives a context's pass/fail from its event stream.
pub struct StepGate;

impl StepGate {
    /// Evaluate a recorded run.
    ///
    /// Gate rules:
    /// - every `step_started` must be followed by `step_succeeded` for the same step
    /// - every `step_failed` is a violation
    /// - a step started after a failure is a violation (fail-fast breach)
    /// - `step_skipped` is reported but adds no violation of its own
    pub fn evaluate(events: &[RunEvent]) -> GateVerdict {
        let mut violations = Vec::new();
        let mut skipped = Vec::new();

        let mut started = BTreeSet::new();
        let mut completed = BTreeSet::new();
        let mut failed: Option<String> = None;

        for event in events {
            let step = event.payload["step"]
                .as_str()
                .unwrap_or("unknown")
                .to_string();
            match event.kind.as_str() {
                "step_started" => {
                    if let Some(first) = &failed {
                        violations.push(format!(
                            "Step '{}' started after '{}' failed",
                            step, first
                        ));
                    }
                    started.insert(step);
                }
                "step_succeeded" => {
                    let exit_code = event.payload["exit_code"].as_i64().unwrap_or(-1);
                    if exit_code == 0 {
                        completed.insert(step);
                    } else {
                        violations.push(format!(
                            "Step '{}' reported success with exit code {}",
                            step, exit_code
                        ));
                    }
                }
                "step_failed" => {
                    let error = event.payload["error"]
                        .as_str()
                        .unwrap_or("Unknown error")
                        .to_string();
                    let kind = event.payload["failure_kind"].as_str().unwrap_or("unknown");
                    violations.push(format!("Step '{}' failed ({}): {}", step, kind, error));
                    failed.get_or_insert(step);
                }
                "step_skipped" => skipped.push(step),
                _ => {}
            }
        }

        for step in &started {
            if !completed.contains(step)
                && !violations.iter().any(|v| v.contains(&format!("'{}'", step)))
            {
                violations.push(format!("Step '{}' was started but never completed", step));
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            "All steps passed".to_string()
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            skipped,
            message,
        }
    }
}
