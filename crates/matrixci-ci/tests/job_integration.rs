//! Integration tests for matrix jobs with the in-memory and filesystem ledgers.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use matrixci_ci::fakes::ScriptedExecutor;
use matrixci_ci::{
    FailureCause, JobOutcome, JobReport, JobRequest, JobResult, JobRunner, ProcessExecutor,
    StepExecutor, StepGate,
};
use matrixci_core::{
    ContextState, FailureKind, MatrixExpander, RepoEvent, Settings, Workflow,
};
use matrixci_state::fakes::MemoryRunLedger;
use matrixci_state::{FsRunLedger, RunId, RunLedger, RunStatus};

const PY39: &str = "python-version=3.9";
const PY313: &str = "python-version=3.13";

const STEPS: [&str; 5] = [
    "Checkout",
    "Set up Python 3.9",
    "Install",
    "Type-check module",
    "Type-check tests",
];

fn code_push() -> JobRequest {
    JobRequest {
        event: RepoEvent::push("main", &["multiqc/core.py"]),
        repo: PathBuf::from("."),
        revision: Some("abc123".to_string()),
    }
}

async fn run_job(
    ledger: Arc<dyn RunLedger>,
    executor: Arc<dyn StepExecutor>,
    settings: Settings,
    workflow: &Workflow,
    request: &JobRequest,
) -> JobResult {
    let outcome = JobRunner::new(ledger, executor, settings)
        .run(workflow, request)
        .await
        .expect("job failed to run");
    match outcome {
        JobOutcome::Completed(result) => result,
        JobOutcome::NotTriggered { reason } => panic!("job not triggered: {}", reason),
    }
}

/// Test: a failure in one context leaves the other untouched
#[tokio::test]
async fn test_contexts_are_independent() {
    let home = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryRunLedger::new());
    let executor = Arc::new(ScriptedExecutor::new().fail_in(PY39, "Install", 1));

    let result = run_job(
        ledger.clone(),
        executor.clone(),
        Settings::default().with_home(home.path()),
        &Workflow::typecheck_default(),
        &code_push(),
    )
    .await;

    assert!(!result.success(), "job must fail when any context fails");
    let py39 = &result.contexts[0];
    let py313 = &result.contexts[1];

    assert_eq!(py39.failure(), Some(("Install", FailureKind::Installation)));
    assert_eq!(py39.skipped, vec!["Type-check module", "Type-check tests"]);
    assert_eq!(executor.calls_for(PY39), STEPS[..3].to_vec());

    assert!(py313.succeeded());
    assert_eq!(executor.calls_for(PY313).len(), 5);

    let failed = ledger.get_run(&RunId(py39.run_id.clone())).await.unwrap();
    let passed = ledger.get_run(&RunId(py313.run_id.clone())).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(passed.status, RunStatus::Completed);
    assert_ne!(failed.spec_digest, passed.spec_digest);
}

/// Test: failing at step N executes nothing after N, for every N
#[tokio::test]
async fn test_fail_fast_at_every_step() {
    let expected_kinds = [
        FailureKind::Provisioning,
        FailureKind::Provisioning,
        FailureKind::Installation,
        FailureKind::TypeCheck,
        FailureKind::TypeCheck,
    ];

    for (n, step) in STEPS.iter().enumerate() {
        let home = tempfile::tempdir().unwrap();
        // Provisioning step names differ per context; fail both spellings.
        let executor = ScriptedExecutor::new()
            .fail(step, 2)
            .fail(&step.replace("3.9", "3.13"), 2);
        let executor = Arc::new(executor);

        let result = run_job(
            Arc::new(MemoryRunLedger::new()),
            executor.clone(),
            Settings::default().with_home(home.path()),
            &Workflow::typecheck_default(),
            &code_push(),
        )
        .await;

        assert!(!result.success());
        for ctx in &result.contexts {
            let (failed_step, kind) = ctx.failure().expect("context should fail");
            assert_eq!(kind, expected_kinds[n], "step {}", step);
            assert_eq!(ctx.steps.len(), n + 1);
            assert_eq!(ctx.skipped.len(), STEPS.len() - n - 1);
            assert_eq!(executor.calls_for(&ctx.label()).len(), n + 1);
            assert_eq!(ctx.failed_step().unwrap().step_name, failed_step);
        }
    }
}

/// Test: the gate re-derives each context's verdict from its events
#[tokio::test]
async fn test_gate_over_recorded_runs() {
    let home = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryRunLedger::new());
    let executor = Arc::new(ScriptedExecutor::new().fail_in(PY313, "Type-check module", 1));

    let result = run_job(
        ledger.clone(),
        executor,
        Settings::default().with_home(home.path()),
        &Workflow::typecheck_default(),
        &code_push(),
    )
    .await;

    for ctx in &result.contexts {
        let events = ledger.get_events(&RunId(ctx.run_id.clone())).await.unwrap();
        let verdict = StepGate::evaluate(&events);
        assert_eq!(verdict.passed, ctx.succeeded(), "context {}", ctx.label());
        if !ctx.succeeded() {
            assert_eq!(verdict.violations.len(), 1);
            assert!(verdict.violations[0].contains("type_check"));
            assert_eq!(verdict.skipped, vec!["Type-check tests"]);
        }
    }
}

/// Test: timeouts are step failures, not job errors
#[tokio::test]
async fn test_timeout_fails_context() {
    let home = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new().time_out("Install"));

    let result = run_job(
        Arc::new(MemoryRunLedger::new()),
        executor,
        Settings::default().with_home(home.path()),
        &Workflow::typecheck_default(),
        &code_push(),
    )
    .await;

    for ctx in &result.contexts {
        assert_eq!(ctx.failure(), Some(("Install", FailureKind::Installation)));
        assert_eq!(
            ctx.failed_step().unwrap().cause,
            Some(FailureCause::Timeout { secs: 1800 })
        );
    }
}

/// Test: max-parallel bounds concurrent contexts
#[tokio::test]
async fn test_max_parallel_limits_concurrency() {
    for (limit, expected_peak) in [(Some(1), 1), (None, 2)] {
        let home = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(20)));

        let result = run_job(
            Arc::new(MemoryRunLedger::new()),
            executor.clone(),
            Settings::default()
                .with_home(home.path())
                .with_max_parallel(limit),
            &Workflow::typecheck_default(),
            &code_push(),
        )
        .await;

        assert!(result.success());
        assert_eq!(executor.peak_concurrency(), expected_peak);
    }
}

/// Test: docs-only pull request records nothing
#[tokio::test]
async fn test_not_triggered_records_nothing() {
    let home = tempfile::tempdir().unwrap();
    let ledger = Arc::new(MemoryRunLedger::new());
    let request = JobRequest {
        event: RepoEvent::pull_request("main", &["docs/intro.md", "README.md"]),
        ..code_push()
    };

    let workflow = Workflow::typecheck_default();
    let outcome = JobRunner::new(
        ledger.clone(),
        Arc::new(ScriptedExecutor::new()),
        Settings::default().with_home(home.path()),
    )
    .run(&workflow, &request)
    .await
    .unwrap();

    assert!(matches!(outcome, JobOutcome::NotTriggered { .. }));
    assert!(ledger.list_runs(None).await.unwrap().is_empty());
    assert!(!JobReport::new(&workflow.name, &outcome).triggered);
}

const SHELL_WORKFLOW: &str = r#"
name: shell-check
on:
  manual: true
strategy:
  matrix:
    flavour: ["plain", "broken"]
steps:
  - name: Prepare ${{ matrix.flavour }}
    phase: provision
    run: mkdir -p out && echo "$MATRIX_FLAVOUR" > out/flavour
  - name: Install
    phase: install
    run: test -f out/flavour
  - name: Check
    phase: typecheck
    target: out
    run: test "$(cat out/flavour)" != broken
"#;

/// Test: real shell steps recorded in the filesystem ledger
#[tokio::test]
async fn test_shell_workflow_with_fs_ledger() {
    let home = tempfile::tempdir().unwrap();
    let settings = Settings::default().with_home(home.path());
    let ledger = Arc::new(FsRunLedger::open(settings.ledger_dir()).unwrap());
    let workflow = Workflow::from_yaml_str(SHELL_WORKFLOW).unwrap();

    let request = JobRequest {
        event: RepoEvent::manual("main"),
        repo: home.path().to_path_buf(),
        revision: None,
    };
    let result = run_job(
        ledger.clone(),
        Arc::new(ProcessExecutor::new()),
        settings,
        &workflow,
        &request,
    )
    .await;

    // Axis values keep declaration order.
    let plain = &result.contexts[0];
    let broken = &result.contexts[1];
    assert_eq!(plain.label(), "flavour=plain");
    assert!(plain.succeeded(), "plain context failed: {:?}", plain.state);
    assert_eq!(
        broken.state,
        ContextState::Failed {
            step: "Check".to_string(),
            kind: FailureKind::TypeCheck
        }
    );
    assert!(result.revision.is_none());

    let runs = ledger.list_runs(Some("shell-check")).await.unwrap();
    assert_eq!(runs.len(), 2);

    let text = JobReport::new(&workflow.name, &JobOutcome::Completed(result)).render_text();
    assert!(text.contains("✗ flavour=broken  type_check failure in 'Check' (exited with code 1)"));
}

fn run_git(repo_dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Test: checkout clones the triggering revision into each context
#[tokio::test]
async fn test_checkout_uses_triggering_revision() {
    let repo = tempfile::tempdir().unwrap();
    run_git(repo.path(), &["init", "-b", "main"]);
    run_git(repo.path(), &["config", "user.name", "test-user"]);
    run_git(repo.path(), &["config", "user.email", "test@example.com"]);
    std::fs::write(repo.path().join("marker.txt"), "first\n").unwrap();
    run_git(repo.path(), &["add", "."]);
    run_git(repo.path(), &["commit", "-m", "first"]);
    let first = matrixci_core::capture_head_sha(repo.path()).unwrap();
    std::fs::write(repo.path().join("marker.txt"), "second\n").unwrap();
    run_git(repo.path(), &["commit", "-am", "second"]);

    let workflow = Workflow::from_yaml_str(
        r#"
name: checkout-check
on:
  push:
    branches: [main]
strategy:
  matrix:
    n: ["1", "2"]
steps:
  - name: Checkout
    uses: checkout
  - name: Verify
    phase: typecheck
    run: grep -q first marker.txt
"#,
    )
    .unwrap();
    assert_eq!(MatrixExpander::expand(&workflow.strategy).unwrap().len(), 2);

    let home = tempfile::tempdir().unwrap();
    let result = run_job(
        Arc::new(MemoryRunLedger::new()),
        Arc::new(ProcessExecutor::new()),
        Settings::default().with_home(home.path()),
        &workflow,
        &JobRequest {
            event: RepoEvent::push("main", &["marker.txt"]),
            repo: repo.path().to_path_buf(),
            revision: Some(first.clone()),
        },
    )
    .await;

    assert!(result.success(), "{:?}", result.contexts);
    assert_eq!(result.revision.as_deref(), Some(first.as_str()));
}
