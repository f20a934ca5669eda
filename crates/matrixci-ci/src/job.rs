//! Job orchestration: trigger → matrix → concurrent execution contexts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use matrixci_core::{
    capture_head_sha, is_git_repo, obs, MatrixEntry, MatrixExpander, RepoEvent, Settings, SkipReason,
    TriggerDecision, TriggerEvaluator, Workflow,
};
use matrixci_state::RunLedger;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::context::{ContextResult, ExecutionContext};
use crate::error::{CiError, Result};
use crate::runner::{ExecEnv, StepExecutor};
use crate::spec::JobSpec;
use crate::step::{resolve_steps, StepConfig};

/// Input for one job run.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub event: RepoEvent,
    /// Repository the checkout step clones.
    pub repo: PathBuf,
    /// Revision to run; resolved from `repo`'s HEAD when unset.
    pub revision: Option<String>,
}

/// Result of a triggered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub workflow: String,
    pub revision: Option<String>,
    /// One result per matrix entry, in expansion order.
    pub contexts: Vec<ContextResult>,
    pub duration_ms: u64,
}

impl JobResult {
    /// A job succeeds only if every context succeeded.
    pub fn success(&self) -> bool {
        !self.contexts.is_empty() && self.contexts.iter().all(|c| c.succeeded())
    }

    pub fn failed_contexts(&self) -> impl Iterator<Item = &ContextResult> {
        self.contexts.iter().filter(|c| !c.succeeded())
    }
}

/// Outcome of [`JobRunner::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    NotTriggered { reason: SkipReason },
    Completed(JobResult),
}

impl JobOutcome {
    /// Whether the job counts as passing. A job that did not trigger passes.
    pub fn success(&self) -> bool {
        match self {
            JobOutcome::NotTriggered { .. } => true,
            JobOutcome::Completed(result) => result.success(),
        }
    }
}

/// Runs a workflow as a matrix job.
pub struct JobRunner {
    ledger: Arc<dyn RunLedger>,
    executor: Arc<dyn StepExecutor>,
    settings: Settings,
    keep_work_dirs: bool,
}

impl JobRunner {
    pub fn new(
        ledger: Arc<dyn RunLedger>,
        executor: Arc<dyn StepExecutor>,
        settings: Settings,
    ) -> Self {
        Self {
            ledger,
            executor,
            settings,
            keep_work_dirs: false,
        }
    }

    /// Keep `<home>/work/<job-id>` after the job finishes.
    pub fn keep_work_dirs(mut self, keep: bool) -> Self {
        self.keep_work_dirs = keep;
        self
    }

    /// Evaluate the trigger and, if it fires, run every matrix context.
    ///
    /// Contexts run concurrently (bounded by `max-parallel`) and never
    /// affect each other: a failing context does not cancel the rest.
    /// Only infrastructure problems are returned as `Err`.
    pub async fn run(&self, workflow: &Workflow, request: &JobRequest) -> Result<JobOutcome> {
        workflow.validate()?;

        if let TriggerDecision::Skip(reason) =
            TriggerEvaluator::new(&workflow.on).evaluate(&request.event)
        {
            info!(workflow = %workflow.name, reason = %reason, "Job not triggered");
            return Ok(JobOutcome::NotTriggered { reason });
        }

        let start = Instant::now();
        let entries = MatrixExpander::expand(&workflow.strategy)?;
        let revision = match &request.revision {
            Some(sha) => Some(sha.clone()),
            None if is_git_repo(&request.repo) => Some(capture_head_sha(&request.repo)?),
            None => None,
        };

        let job_id = Uuid::new_v4().to_string();
        let job_dir = self.settings.work_dir().join(&job_id);
        let limit = self
            .settings
            .max_parallel
            .or(workflow.strategy.max_parallel)
            .unwrap_or(entries.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        info!(
            job_id = %job_id,
            workflow = %workflow.name,
            contexts = entries.len(),
            max_parallel = limit,
            "Starting job"
        );

        let prepared = match self
            .prepare(workflow, request, entries, &job_dir, &revision)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                self.clean_up(&job_dir).await;
                return Err(e);
            }
        };

        let mut handles = Vec::with_capacity(prepared.len());
        for PreparedContext {
            entry,
            steps,
            spec,
            env,
        } in prepared
        {
            let label = env.context_label.clone();
            let ledger = self.ledger.clone();
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let span = obs::context_span(&workflow.name, &label);
            let task_label = label.clone();
            let handle = tokio::spawn(
                async move {
                    let _permit =
                        semaphore
                            .acquire_owned()
                            .await
                            .map_err(|e| CiError::ContextAborted {
                                context: task_label,
                                reason: e.to_string(),
                            })?;
                    ExecutionContext::run(ledger, executor, &spec, &entry, &steps, &env).await
                }
                .instrument(span),
            );
            handles.push((label, handle));
        }

        let joined = join_all(
            handles
                .into_iter()
                .map(|(label, handle)| async move { (label, handle.await) }),
        )
        .await;

        self.clean_up(&job_dir).await;

        let mut contexts = Vec::with_capacity(joined.len());
        for (label, joined) in joined {
            match joined {
                Ok(result) => contexts.push(result?),
                Err(e) => {
                    return Err(CiError::ContextAborted {
                        context: label,
                        reason: e.to_string(),
                    })
                }
            }
        }
        contexts.sort_by_key(|c| c.entry.index);

        let result = JobResult {
            job_id,
            workflow: workflow.name.clone(),
            revision,
            contexts,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            job_id = %result.job_id,
            success = result.success(),
            failed = result.failed_contexts().count(),
            "Job finished"
        );
        Ok(JobOutcome::Completed(result))
    }

    /// Resolve steps and create the work dir of every entry, before any
    /// context starts.
    async fn prepare(
        &self,
        workflow: &Workflow,
        request: &JobRequest,
        entries: Vec<MatrixEntry>,
        job_dir: &Path,
        revision: &Option<String>,
    ) -> Result<Vec<PreparedContext>> {
        let mut prepared = Vec::with_capacity(entries.len());
        for entry in entries {
            let steps = resolve_steps(workflow, &entry, self.settings.step_timeout_secs)?;
            let spec = JobSpec::new(&workflow.name, &entry, &steps, revision.clone());

            let work_dir = job_dir.join(entry.index.to_string());
            tokio::fs::create_dir_all(&work_dir).await?;
            let env = ExecEnv {
                work_dir,
                repo: request.repo.clone(),
                revision: revision.clone(),
                context_label: entry.label(),
            };
            prepared.push(PreparedContext {
                entry,
                steps,
                spec,
                env,
            });
        }
        Ok(prepared)
    }

    async fn clean_up(&self, job_dir: &Path) {
        if self.keep_work_dirs {
            return;
        }
        match tokio::fs::remove_dir_all(job_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %job_dir.display(), error = %e, "Failed to remove job work dir"),
        }
    }
}

struct PreparedContext {
    entry: MatrixEntry,
    steps: Vec<StepConfig>,
    spec: JobSpec,
    env: ExecEnv,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedExecutor;
    use matrixci_state::fakes::MemoryRunLedger;

    fn runner(executor: Arc<ScriptedExecutor>, home: &std::path::Path) -> JobRunner {
        JobRunner::new(
            Arc::new(MemoryRunLedger::new()),
            executor,
            Settings::default().with_home(home),
        )
    }

    fn request(event: RepoEvent) -> JobRequest {
        JobRequest {
            event,
            repo: PathBuf::from("."),
            revision: Some("abc123".to_string()),
        }
    }

    #[tokio::test]
    async fn test_docs_only_push_is_not_triggered() {
        let home = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let outcome = runner(executor.clone(), home.path())
            .run(
                &Workflow::typecheck_default(),
                &request(RepoEvent::push("main", &["docs/intro.md"])),
            )
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            JobOutcome::NotTriggered {
                reason: SkipReason::AllPathsIgnored
            }
        ));
        assert!(outcome.success());
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_code_push_runs_both_contexts() {
        let home = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let outcome = runner(executor.clone(), home.path())
            .run(
                &Workflow::typecheck_default(),
                &request(RepoEvent::push("main", &["multiqc/core.py"])),
            )
            .await
            .unwrap();

        let JobOutcome::Completed(result) = outcome else {
            panic!("expected job to run");
        };
        assert!(result.success());
        assert_eq!(result.contexts.len(), 2);
        assert_eq!(result.contexts[0].label(), "python-version=3.9");
        assert_eq!(result.contexts[1].label(), "python-version=3.13");
        assert_eq!(executor.calls().len(), 10);
        assert!(!home.path().join("work").join(&result.job_id).exists());
    }

    #[tokio::test]
    async fn test_work_dirs_kept_on_request() {
        let home = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let outcome = runner(executor, home.path())
            .keep_work_dirs(true)
            .run(
                &Workflow::typecheck_default(),
                &request(RepoEvent::pull_request("main", &["tests/test_core.py"])),
            )
            .await
            .unwrap();

        let JobOutcome::Completed(result) = outcome else {
            panic!("expected job to run");
        };
        let job_dir = home.path().join("work").join(&result.job_id);
        assert!(job_dir.join("0").is_dir());
        assert!(job_dir.join("1").is_dir());
    }

    #[tokio::test]
    async fn test_unusable_work_dir_starts_no_context() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the home directory should be.
        let home = dir.path().join("home");
        std::fs::write(&home, "not a directory").unwrap();

        let ledger = Arc::new(MemoryRunLedger::new());
        let executor = Arc::new(ScriptedExecutor::new());
        let result = JobRunner::new(
            ledger.clone(),
            executor.clone(),
            Settings::default().with_home(&home),
        )
        .run(
            &Workflow::typecheck_default(),
            &request(RepoEvent::push("main", &["multiqc/core.py"])),
        )
        .await;

        assert!(result.is_err());
        assert!(executor.calls().is_empty());
        assert!(ledger.list_runs(None).await.unwrap().is_empty());
    }
}
