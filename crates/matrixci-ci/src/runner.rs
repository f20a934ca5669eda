//! Step execution.
//!
//! [`StepExecutor`] is the seam between a context and the outside world.
//! [`ProcessExecutor`] runs steps as child processes; tests substitute a
//! scripted executor.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

use crate::step::{StepCommand, StepConfig};

/// Why a step did not pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    NonZeroExit { code: i32 },
    Timeout { secs: u64 },
    SpawnError { message: String },
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::NonZeroExit { code } => write!(f, "exited with code {}", code),
            FailureCause::Timeout { secs } => write!(f, "timed out after {}s", secs),
            FailureCause::SpawnError { message } => write!(f, "could not be started: {}", message),
        }
    }
}

/// Error raised when a step cannot produce an exit status.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("step '{step}' timed out after {secs} seconds")]
    Timeout { step: String, secs: u64 },

    #[error("step '{step}' could not be spawned: {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("step '{step}' has an empty script")]
    EmptyScript { step: String },
}

impl ExecError {
    pub fn cause(&self) -> FailureCause {
        match self {
            ExecError::Timeout { secs, .. } => FailureCause::Timeout { secs: *secs },
            other => FailureCause::SpawnError {
                message: other.to_string(),
            },
        }
    }
}

/// Result of a step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,

    /// Exit code (0 = success, -1 when no status was produced).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,

    pub success: bool,

    /// Set when the step did not pass.
    pub cause: Option<FailureCause>,
}

impl StepResult {
    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Build a result from a finished process.
    pub fn from_output(step_name: &str, output: &Output, duration_ms: u64) -> Self {
        let exit_code = output.status.code().unwrap_or(-1);
        let success = output.status.success();
        Self {
            step_name: step_name.to_string(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success,
            cause: (!success).then_some(FailureCause::NonZeroExit { code: exit_code }),
        }
    }

    /// Build a failed result for a step that never produced a status.
    pub fn errored(step_name: &str, error: &ExecError, duration_ms: u64) -> Self {
        Self {
            step_name: step_name.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stderr: error.to_string(),
            duration_ms,
            success: false,
            cause: Some(error.cause()),
        }
    }
}

/// Where and for what a step runs.
#[derive(Debug, Clone)]
pub struct ExecEnv {
    /// Isolated working directory of the context.
    pub work_dir: PathBuf,
    /// Repository cloned by checkout steps.
    pub repo: PathBuf,
    /// Revision checked out; `HEAD` of `repo` when unset.
    pub revision: Option<String>,
    /// Matrix label of the context.
    pub context_label: String,
}

/// Executes a single resolved step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run `step` inside `env`.
    ///
    /// A non-zero exit is an `Ok` result with `passed() == false`; `Err` is
    /// reserved for steps that never produced an exit status.
    async fn execute(&self, step: &StepConfig, env: &ExecEnv) -> Result<StepResult, ExecError>;
}

/// Runs steps as child processes (`sh -c` for scripts, `git` for checkout).
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    shell: String,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different POSIX shell binary.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    async fn checkout(&self, step: &StepConfig, env: &ExecEnv) -> Result<StepResult, ExecError> {
        let start = Instant::now();
        let revision = env.revision.as_deref().unwrap_or("HEAD");

        let mut clone = Command::new("git");
        clone
            .arg("clone")
            .arg("--quiet")
            .arg("--no-checkout")
            .arg(&env.repo)
            .arg(&env.work_dir);
        let cloned = wait_for(clone, step).await?;
        if !cloned.status.success() {
            return Ok(StepResult::from_output(
                &step.name,
                &cloned,
                start.elapsed().as_millis() as u64,
            ));
        }

        let mut checkout = Command::new("git");
        checkout
            .arg("-C")
            .arg(&env.work_dir)
            .args(["checkout", "--quiet", "--detach", revision]);
        let checked_out = wait_for(checkout, step).await?;

        let mut result = StepResult::from_output(
            &step.name,
            &checked_out,
            start.elapsed().as_millis() as u64,
        );
        result.stdout = format!(
            "{}{}",
            String::from_utf8_lossy(&cloned.stdout),
            result.stdout
        );
        result.stderr = format!(
            "{}{}",
            String::from_utf8_lossy(&cloned.stderr),
            result.stderr
        );
        Ok(result)
    }

    async fn shell(
        &self,
        step: &StepConfig,
        script: &str,
        env: &ExecEnv,
    ) -> Result<StepResult, ExecError> {
        if script.trim().is_empty() {
            return Err(ExecError::EmptyScript {
                step: step.name.clone(),
            });
        }
        let start = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(script)
            .current_dir(step_dir(&env.work_dir, step.working_directory.as_deref()))
            .envs(&step.env)
            .env("MATRIXCI_CONTEXT", &env.context_label);
        let output = wait_for(cmd, step).await?;

        Ok(StepResult::from_output(
            &step.name,
            &output,
            start.elapsed().as_millis() as u64,
        ))
    }
}

#[async_trait]
impl StepExecutor for ProcessExecutor {
    async fn execute(&self, step: &StepConfig, env: &ExecEnv) -> Result<StepResult, ExecError> {
        match &step.command {
            StepCommand::Checkout => self.checkout(step, env).await,
            StepCommand::Shell { script } => self.shell(step, script, env).await,
        }
    }
}

fn step_dir(work_dir: &Path, working_directory: Option<&str>) -> PathBuf {
    match working_directory {
        Some(dir) => work_dir.join(dir),
        None => work_dir.to_path_buf(),
    }
}

/// Spawn `cmd` with captured output and wait, honouring the step timeout.
async fn wait_for(mut cmd: Command, step: &StepConfig) -> Result<Output, ExecError> {
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            step: step.name.clone(),
            source,
        })?;

    let waited = if step.timeout_secs > 0 {
        tokio::time::timeout(
            Duration::from_secs(step.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| ExecError::Timeout {
            step: step.name.clone(),
            secs: step.timeout_secs,
        })?
    } else {
        child.wait_with_output().await
    };

    waited.map_err(|source| ExecError::Spawn {
        step: step.name.clone(),
        source,
    })
}

/// Keep at most the last `max_bytes` of `text`, on a char boundary.
pub fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixci_core::Phase;

    fn env(dir: &Path) -> ExecEnv {
        ExecEnv {
            work_dir: dir.to_path_buf(),
            repo: dir.to_path_buf(),
            revision: None,
            context_label: "python-version=3.9".to_string(),
        }
    }

    #[test]
    fn test_step_result_passed() {
        let result = StepResult {
            step_name: "Install".to_string(),
            exit_code: 0,
            stdout: "".to_string(),
            stderr: "".to_string(),
            duration_ms: 100,
            success: true,
            cause: None,
        };
        assert!(result.passed());
    }

    #[test]
    fn test_errored_result_carries_cause() {
        let err = ExecError::Timeout {
            step: "Type-check tests".to_string(),
            secs: 3,
        };
        let result = StepResult::errored("Type-check tests", &err, 3000);
        assert!(!result.passed());
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.cause, Some(FailureCause::Timeout { secs: 3 }));
        assert!(result.stderr.contains("timed out"));
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        // 'é' is two bytes; cutting into it moves forward.
        assert_eq!(tail("aé", 1), "");
        assert_eq!(tail("aéb", 3), "éb");
    }

    #[tokio::test]
    async fn test_execute_simple_script() {
        let dir = tempfile::tempdir().unwrap();
        let step = StepConfig::shell("echo", Phase::Install, "echo hello", 60);

        let result = ProcessExecutor::new()
            .execute(&step, &env(dir.path()))
            .await
            .expect("execute failed");
        assert!(result.passed());
        assert!(result.stdout.contains("hello"));
        assert!(result.cause.is_none());
    }

    #[tokio::test]
    async fn test_execute_failing_script() {
        let dir = tempfile::tempdir().unwrap();
        let step = StepConfig::shell("fail", Phase::Typecheck, "echo broken >&2; exit 3", 60);

        let result = ProcessExecutor::new()
            .execute(&step, &env(dir.path()))
            .await
            .expect("execute failed");
        assert!(!result.passed());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.cause, Some(FailureCause::NonZeroExit { code: 3 }));
        assert!(result.stderr.contains("broken"));
    }

    #[tokio::test]
    async fn test_matrix_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut step = StepConfig::shell(
            "env",
            Phase::Provision,
            "echo $MATRIX_PYTHON_VERSION $MATRIXCI_CONTEXT; pwd",
            60,
        );
        step.env
            .insert("MATRIX_PYTHON_VERSION".to_string(), "3.9".to_string());
        step.working_directory = Some("sub".to_string());

        let result = ProcessExecutor::new()
            .execute(&step, &env(dir.path()))
            .await
            .unwrap();
        assert!(result.passed());
        assert!(result.stdout.contains("3.9 python-version=3.9"));
        assert!(result.stdout.trim_end().ends_with("sub"));
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let step = StepConfig::shell("slow", Phase::Install, "sleep 5", 1);

        let err = ProcessExecutor::new()
            .execute(&step, &env(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.cause(), FailureCause::Timeout { secs: 1 });
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let step = StepConfig::shell("x", Phase::Install, "true", 60);

        let err = ProcessExecutor::new()
            .with_shell("/nonexistent/shell")
            .execute(&step, &env(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
