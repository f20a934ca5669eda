//! matrixci - local runner for matrix CI jobs
//!
//! The `matrixci` command decides whether a repository event triggers a
//! workflow, expands its version matrix and runs every context fail-fast.
//!
//! ## Commands
//!
//! - `trigger`: Decide whether an event runs the job
//! - `matrix`: Show the expanded matrix contexts
//! - `validate`: Validate a workflow file
//! - `run`: Run the job and record each context in the ledger
//! - `gate`: Evaluate a recorded context run
//! - `runs`: List and inspect recorded runs

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use matrixci_ci::{JobOutcome, JobReport, JobRequest, JobRunner, ProcessExecutor, StepGate};
use matrixci_core::{
    changed_paths, current_branch, is_git_repo, obs, EventKind, MatrixExpander, RepoEvent, Settings, TriggerDecision,
    TriggerEvaluator, Workflow,
};
use matrixci_state::{FsRunLedger, RunId, RunLedger};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

const DEFAULT_BRANCH: &str = "main";

#[derive(Parser)]
#[command(name = "matrixci")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run matrix CI jobs locally", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Ledger and work directory root (overrides MATRIXCI_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether an event triggers the job (exit 0 if it would run)
    Trigger {
        /// Workflow file (default: built-in type-checking workflow)
        #[arg(short, long)]
        workflow: Option<PathBuf>,

        #[command(flatten)]
        event: EventArgs,
    },

    /// Show the expanded matrix contexts
    Matrix {
        /// Workflow file (default: built-in type-checking workflow)
        #[arg(short, long)]
        workflow: Option<PathBuf>,

        /// Emit JSON output instead of terminal text
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Workflow file (default: built-in type-checking workflow)
        #[arg(short, long)]
        workflow: Option<PathBuf>,
    },

    /// Run the job for an event and record every context
    Run {
        /// Workflow file (default: built-in type-checking workflow)
        #[arg(short, long)]
        workflow: Option<PathBuf>,

        #[command(flatten)]
        event: EventArgs,

        /// Revision to check out (default: HEAD of --repo)
        #[arg(long)]
        sha: Option<String>,

        /// Cap on concurrently running contexts
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Keep context work directories after the job
        #[arg(long)]
        keep_work_dirs: bool,

        /// Emit the job report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate the gate over a recorded context run
    Gate {
        /// Run ID to evaluate
        #[arg(long)]
        run: String,

        /// Emit JSON output instead of terminal text
        #[arg(long)]
        json: bool,
    },

    /// Inspect recorded runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recorded runs, newest first
    List {
        /// Only runs of this job (workflow name)
        #[arg(long)]
        job: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a run and its events
    Show {
        /// Run ID
        #[arg(long)]
        run: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EventArg {
    Push,
    PullRequest,
    Manual,
}

impl From<EventArg> for EventKind {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::Push => EventKind::Push,
            EventArg::PullRequest => EventKind::PullRequest,
            EventArg::Manual => EventKind::Manual,
        }
    }
}

/// Repository event description shared by `trigger` and `run`.
#[derive(Args, Debug, Clone)]
struct EventArgs {
    /// Event type
    #[arg(short, long, value_enum, default_value = "push")]
    event: EventArg,

    /// Pushed branch, or target branch of the pull request
    /// (default: current branch of --repo, else main)
    #[arg(short, long)]
    branch: Option<String>,

    /// Changed path (repeatable)
    #[arg(short, long = "changed", value_name = "PATH")]
    changed: Vec<String>,

    /// Add the paths changed in a git range, e.g. origin/main..HEAD
    #[arg(long, value_name = "BASE..HEAD")]
    diff: Option<String>,

    /// Repository to diff and check out
    #[arg(long, default_value = ".")]
    repo: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    matrixci_core::init_tracing(cli.json_logs, level);

    let mut settings = Settings::from_env().context("Invalid matrixci settings")?;
    if let Some(home) = cli.home {
        settings = settings.with_home(home);
    }

    let passed = match cli.command {
        Commands::Trigger { workflow, event } => cmd_trigger(workflow.as_deref(), &event)?,
        Commands::Matrix { workflow, json } => cmd_matrix(workflow.as_deref(), json)?,
        Commands::Validate { workflow } => cmd_validate(workflow.as_deref())?,
        Commands::Run {
            workflow,
            event,
            sha,
            max_parallel,
            keep_work_dirs,
            json,
        } => {
            let ledger = open_ledger(&settings)?;
            let settings = settings.with_max_parallel(max_parallel);
            cmd_run(
                ledger,
                settings,
                workflow.as_deref(),
                &event,
                sha,
                keep_work_dirs,
                json,
            )
            .await?
        }
        Commands::Gate { run, json } => {
            let ledger = open_ledger(&settings)?;
            cmd_gate(ledger.as_ref(), &run, json).await?
        }
        Commands::Runs { action } => {
            let ledger = open_ledger(&settings)?;
            match action {
                RunsAction::List { job, limit } => {
                    cmd_runs_list(ledger.as_ref(), job.as_deref(), limit).await?
                }
                RunsAction::Show { run } => cmd_runs_show(ledger.as_ref(), &run).await?,
            }
        }
    };

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn open_ledger(settings: &Settings) -> Result<Arc<dyn RunLedger>> {
    let dir = settings.ledger_dir();
    let ledger = FsRunLedger::open(&dir)
        .with_context(|| format!("Failed to open run ledger at {:?}", dir))?;
    Ok(Arc::new(ledger))
}

fn load_workflow(path: Option<&Path>) -> Result<Workflow> {
    match path {
        Some(path) => {
            Workflow::load(path).with_context(|| format!("Failed to load workflow {:?}", path))
        }
        None => Ok(Workflow::typecheck_default()),
    }
}

/// Build the repository event, adding paths from `--diff` when given.
fn build_event(args: &EventArgs) -> Result<RepoEvent> {
    let mut changed = args.changed.clone();
    if let Some(range) = &args.diff {
        let diffed = changed_paths(&args.repo, range)
            .with_context(|| format!("Failed to list paths changed in {}", range))?;
        changed.extend(diffed);
    }
    Ok(RepoEvent {
        kind: args.event.into(),
        branch: event_branch(args)?,
        changed_paths: changed,
    })
}

/// `--branch`, else the branch checked out in `--repo`, else `main`.
fn event_branch(args: &EventArgs) -> Result<String> {
    if let Some(branch) = &args.branch {
        return Ok(branch.clone());
    }
    if is_git_repo(&args.repo) {
        let branch = current_branch(&args.repo)
            .with_context(|| format!("Failed to read current branch of {:?}", args.repo))?;
        // Detached HEAD has no branch name.
        if branch != "HEAD" {
            return Ok(branch);
        }
    }
    Ok(DEFAULT_BRANCH.to_string())
}

/// Decide whether an event triggers the workflow
fn cmd_trigger(workflow_path: Option<&Path>, args: &EventArgs) -> Result<bool> {
    let workflow = load_workflow(workflow_path)?;
    let event = build_event(args)?;

    match TriggerEvaluator::new(&workflow.on).evaluate(&event) {
        TriggerDecision::Run { relevant_paths } => {
            println!(
                "✓ {} would run on {} to {}",
                workflow.name, event.kind, event.branch
            );
            for path in &relevant_paths {
                println!("  - {}", path);
            }
            Ok(true)
        }
        TriggerDecision::Skip(reason) => {
            println!("✗ {} would not run: {}", workflow.name, reason);
            Ok(false)
        }
    }
}

/// Show the expanded matrix
fn cmd_matrix(workflow_path: Option<&Path>, json: bool) -> Result<bool> {
    let workflow = load_workflow(workflow_path)?;
    let entries = MatrixExpander::expand(&workflow.strategy)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(true);
    }

    println!("{}: {} context(s)", workflow.name, entries.len());
    for entry in &entries {
        println!("  [{}] {}", entry.index, entry.label());
    }
    Ok(true)
}

/// Validate a workflow file
fn cmd_validate(workflow_path: Option<&Path>) -> Result<bool> {
    let workflow = load_workflow(workflow_path)?;
    let entries = MatrixExpander::expand(&workflow.strategy)?;

    let mut triggers = Vec::new();
    if workflow.on.push.is_some() {
        triggers.push("push");
    }
    if workflow.on.pull_request.is_some() {
        triggers.push("pull_request");
    }
    if workflow.on.manual {
        triggers.push("manual");
    }

    println!("✓ Workflow '{}' is valid", workflow.name);
    println!("  Triggers: {}", triggers.join(", "));
    println!("  Contexts: {}", entries.len());
    println!("  Steps:    {}", workflow.steps.len());
    Ok(true)
}

/// Run the job and report every context
async fn cmd_run(
    ledger: Arc<dyn RunLedger>,
    settings: Settings,
    workflow_path: Option<&Path>,
    args: &EventArgs,
    sha: Option<String>,
    keep_work_dirs: bool,
    json: bool,
) -> Result<bool> {
    let workflow = load_workflow(workflow_path)?;
    let request = JobRequest {
        event: build_event(args)?,
        repo: args.repo.clone(),
        revision: sha,
    };

    info!(workflow = %workflow.name, event = %request.event.kind, "Running job");
    let outcome = JobRunner::new(ledger.clone(), Arc::new(ProcessExecutor::new()), settings)
        .keep_work_dirs(keep_work_dirs)
        .run(&workflow, &request)
        .await
        .context("Job failed to run")?;

    // Evaluate gate per recorded context
    let mut gate_passed = true;
    if let JobOutcome::Completed(result) = &outcome {
        for ctx in &result.contexts {
            let events = ledger.get_events(&RunId(ctx.run_id.clone())).await?;
            let verdict = StepGate::evaluate(&events);
            obs::emit_gate_evaluated(&ctx.run_id, verdict.violations.len(), verdict.passed);
            if verdict.passed != ctx.succeeded() {
                warn!(run_id = %ctx.run_id, "Gate verdict disagrees with context state");
            }
            gate_passed &= verdict.passed;
        }
    }

    let report = JobReport::new(&workflow.name, &outcome);
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(outcome.success() && gate_passed)
}

/// Evaluate the gate over a recorded run
async fn cmd_gate(ledger: &dyn RunLedger, run: &str, json: bool) -> Result<bool> {
    let run_id = RunId(run.to_string());
    let events = ledger
        .get_events(&run_id)
        .await
        .with_context(|| format!("Failed to load events for run {}", run))?;

    let verdict = StepGate::evaluate(&events);
    obs::emit_gate_evaluated(run, verdict.violations.len(), verdict.passed);

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(verdict.passed);
    }

    println!(
        "Gate: {}",
        if verdict.passed {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
    if !verdict.violations.is_empty() {
        println!("Violations:");
        for violation in &verdict.violations {
            println!("  - {}", violation);
        }
    }
    if !verdict.skipped.is_empty() {
        println!("Skipped: {}", verdict.skipped.join(", "));
    }
    Ok(verdict.passed)
}

/// List recorded runs
async fn cmd_runs_list(ledger: &dyn RunLedger, job: Option<&str>, limit: usize) -> Result<bool> {
    let runs = ledger.list_runs(job).await.context("Failed to list runs")?;
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(true);
    }

    for run in runs.iter().take(limit) {
        let sha = run
            .metadata
            .git_sha
            .as_deref()
            .map(short_sha)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<9}  {}  {}  {}  {}",
            run.run_id.0,
            format!("{:?}", run.status),
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            sha,
            run.metadata.job_name,
            run.metadata.context_label,
        );
    }
    if runs.len() > limit {
        println!("... {} more", runs.len() - limit);
    }
    Ok(true)
}

/// First 8 characters of a revision; revision names need not be ASCII.
fn short_sha(sha: &str) -> String {
    sha.chars().take(8).collect()
}

/// Show a run and its events
async fn cmd_runs_show(ledger: &dyn RunLedger, run: &str) -> Result<bool> {
    let run_id = RunId(run.to_string());
    let record = ledger
        .get_run(&run_id)
        .await
        .with_context(|| format!("Run {} not found", run))?;
    let events = ledger.get_events(&run_id).await?;

    println!("Run:     {}", record.run_id.0);
    println!("Job:     {}", record.metadata.job_name);
    println!("Context: {}", record.metadata.context_label);
    println!("Status:  {:?}", record.status);
    println!("Spec:    {}", record.spec_digest.short());
    if let Some(summary) = &record.summary {
        println!("Duration: {}ms", summary.duration_ms);
        if let Some(step) = &summary.failed_step {
            println!("Failed step: {}", step);
        }
    }
    println!();
    for event in &events {
        let detail = event.payload["step"]
            .as_str()
            .or_else(|| event.payload["to"].as_str())
            .unwrap_or("");
        println!("  #{:<3} {:<15} {}", event.seq, event.kind, detail);
    }
    Ok(true)
}
