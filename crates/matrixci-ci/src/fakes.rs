//! Scripted step executor (testing only)
//!
//! `ScriptedExecutor` never spawns processes: every step passes unless a
//! failure was scripted for it. Calls are recorded so tests can assert which
//! steps ran in which context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::runner::{ExecEnv, ExecError, FailureCause, StepExecutor, StepResult};
use crate::step::StepConfig;

#[derive(Debug, Clone)]
enum Scripted {
    Exit(i32),
    Timeout,
}

/// Step executor driven by a failure script.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    /// Keyed by (context label or `None` for every context, step name).
    script: HashMap<(Option<String>, String), Scripted>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `step` with `code` in every context.
    pub fn fail(mut self, step: &str, code: i32) -> Self {
        self.script
            .insert((None, step.to_string()), Scripted::Exit(code));
        self
    }

    /// Fail `step` with `code` only in the context labelled `context`.
    pub fn fail_in(mut self, context: &str, step: &str, code: i32) -> Self {
        self.script.insert(
            (Some(context.to_string()), step.to_string()),
            Scripted::Exit(code),
        );
        self
    }

    /// Make `step` time out in every context.
    pub fn time_out(mut self, step: &str) -> Self {
        self.script
            .insert((None, step.to_string()), Scripted::Timeout);
        self
    }

    /// Sleep this long inside every step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(context label, step name)` of every executed step, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Steps executed for one context, in order.
    pub fn calls_for(&self, context: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(c, _)| c == context)
            .map(|(_, s)| s)
            .collect()
    }

    /// Highest number of steps observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn lookup(&self, context: &str, step: &str) -> Option<Scripted> {
        self.script
            .get(&(Some(context.to_string()), step.to_string()))
            .or_else(|| self.script.get(&(None, step.to_string())))
            .cloned()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, step: &StepConfig, env: &ExecEnv) -> Result<StepResult, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((env.context_label.clone(), step.name.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let exit_code = match self.lookup(&env.context_label, &step.name) {
            None => 0,
            Some(Scripted::Exit(code)) => code,
            Some(Scripted::Timeout) => {
                return Err(ExecError::Timeout {
                    step: step.name.clone(),
                    secs: step.timeout_secs,
                })
            }
        };

        Ok(StepResult {
            step_name: step.name.clone(),
            exit_code,
            stdout: format!("{} ok\n", step.name),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{} failed\n", step.name)
            },
            duration_ms: 0,
            success: exit_code == 0,
            cause: (exit_code != 0).then_some(FailureCause::NonZeroExit { code: exit_code }),
        })
    }
}
