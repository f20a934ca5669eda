//! Workflow definition: triggers, matrix strategy and ordered steps.
//!
//! Workflows are YAML documents. The built-in [`Workflow::typecheck_default`]
//! describes the canonical job: on pushes to `main` and on pull requests,
//! ignoring documentation-only changes, provision one environment per
//! interpreter version, install the package with its `dev` extras and
//! type-check the module tree and the test tree.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CoreError, Result};
use crate::matrix::{env_var_name, matrix_references};
use crate::pattern::Pattern;

/// YAML source of the built-in type-checking workflow.
pub const TYPECHECK_WORKFLOW_YAML: &str = r#"name: typecheck
on:
  push:
    branches: [main]
    paths-ignore:
      - "docs/**"
      - "*.md"
  pull_request:
    paths-ignore:
      - "docs/**"
      - "*.md"
strategy:
  matrix:
    python-version: ["3.9", "3.13"]
steps:
  - name: Checkout
    uses: checkout
  - name: Set up Python ${{ matrix.python-version }}
    phase: provision
    run: python${{ matrix.python-version }} -m venv .venv
  - name: Install package with dev extras
    phase: install
    run: .venv/bin/python -m pip install -e ".[dev]"
  - name: Type-check module
    phase: typecheck
    target: multiqc
    run: .venv/bin/python -m mypy multiqc
  - name: Type-check tests
    phase: typecheck
    target: tests
    run: .venv/bin/python -m mypy tests
"#;

/// Built-in actions a step may `use`.
pub const KNOWN_ACTIONS: &[&str] = &["checkout"];

/// A complete job definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub name: String,
    pub on: Triggers,
    #[serde(default)]
    pub strategy: Strategy,
    pub steps: Vec<StepDef>,
}

/// Events that may start the job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Triggers {
    #[serde(default, deserialize_with = "present_filter")]
    pub push: Option<EventFilter>,
    #[serde(default, deserialize_with = "present_filter")]
    pub pull_request: Option<EventFilter>,
    /// Allow manually requested runs (filters do not apply).
    #[serde(default)]
    pub manual: bool,
}

impl Triggers {
    pub fn is_empty(&self) -> bool {
        self.push.is_none() && self.pull_request.is_none() && !self.manual
    }
}

/// Branch and path filters for one event type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventFilter {
    /// Branch globs; empty means any branch.
    #[serde(default)]
    pub branches: Vec<Pattern>,
    /// Only run when some changed path matches.
    #[serde(default)]
    pub paths: Vec<Pattern>,
    /// Do not run when every changed path matches.
    #[serde(default, rename = "paths-ignore")]
    pub paths_ignore: Vec<Pattern>,
}

/// A key written as `pull_request:` with no body still enables the event.
fn present_filter<'de, D>(deserializer: D) -> std::result::Result<Option<EventFilter>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<EventFilter>::deserialize(deserializer).map(|f| Some(f.unwrap_or_default()))
}

/// How the job fans out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Strategy {
    #[serde(default)]
    pub matrix: Matrix,
    /// Upper bound on concurrently running contexts.
    #[serde(default, rename = "max-parallel")]
    pub max_parallel: Option<usize>,
}

/// Matrix axes plus exclusions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Matrix {
    /// Combinations to drop; each map matches entries containing all its pairs.
    #[serde(default)]
    pub exclude: Vec<BTreeMap<String, MatrixValue>>,
    #[serde(flatten)]
    pub axes: BTreeMap<String, Vec<MatrixValue>>,
}

/// A matrix value as written in YAML. Numbers are accepted but quoting is
/// recommended: `3.10` parses as the float `3.1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MatrixValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl std::fmt::Display for MatrixValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatrixValue::Str(s) => f.write_str(s),
            MatrixValue::Int(i) => write!(f, "{}", i),
            MatrixValue::Float(x) => write!(f, "{}", x),
            MatrixValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Step phases, in the only order they may appear.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Checkout,
    Provision,
    Install,
    Typecheck,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Checkout => "checkout",
            Phase::Provision => "provision",
            Phase::Install => "install",
            Phase::Typecheck => "typecheck",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDef {
    pub name: String,
    /// Defaults to `checkout` for `uses: checkout`; required for `run` steps.
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    /// Type-check target label, e.g. the directory being checked.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, rename = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,
}

impl StepDef {
    /// Phase after defaulting.
    pub fn effective_phase(&self) -> Option<Phase> {
        self.phase.or_else(|| match self.uses.as_deref() {
            Some("checkout") => Some(Phase::Checkout),
            _ => None,
        })
    }

    fn texts(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(self.run.as_deref())
            .chain(self.target.as_deref())
            .chain(self.working_directory.as_deref())
            .chain(self.env.values().map(String::as_str))
    }
}

impl Workflow {
    /// Parse and validate a workflow from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(yaml)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Load and validate a workflow file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::WorkflowRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// The built-in type-checking workflow.
    pub fn typecheck_default() -> Self {
        Self::from_yaml_str(TYPECHECK_WORKFLOW_YAML)
            .expect("built-in typecheck workflow must be valid")
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CoreError::InvalidWorkflow(msg));

        if self.name.trim().is_empty() {
            return invalid("workflow name must not be empty".to_string());
        }
        if self.on.is_empty() {
            return invalid("workflow declares no triggers".to_string());
        }
        for (event, filter) in [("push", &self.on.push), ("pull_request", &self.on.pull_request)] {
            if let Some(filter) = filter {
                if !filter.paths.is_empty() && !filter.paths_ignore.is_empty() {
                    return invalid(format!(
                        "{event}: 'paths' and 'paths-ignore' cannot be combined"
                    ));
                }
            }
        }

        let axes = &self.strategy.matrix.axes;
        let mut env_names: BTreeMap<String, &str> = BTreeMap::new();
        for (key, values) in axes {
            if key.trim().is_empty() {
                return invalid("matrix key must not be empty".to_string());
            }
            if values.is_empty() {
                return invalid(format!("matrix key '{key}' has no values"));
            }
            let mut seen = BTreeSet::new();
            for value in values {
                if !seen.insert(value.to_string()) {
                    return invalid(format!("matrix key '{key}' repeats value '{value}'"));
                }
            }
            let name = env_var_name(key);
            if let Some(other) = env_names.insert(name.clone(), key) {
                return invalid(format!(
                    "matrix keys '{other}' and '{key}' both map to {name}"
                ));
            }
        }
        for exclusion in &self.strategy.matrix.exclude {
            if let Some(key) = exclusion.keys().find(|k| !axes.contains_key(*k)) {
                return invalid(format!("exclude references unknown matrix key '{key}'"));
            }
        }
        if self.strategy.max_parallel == Some(0) {
            return invalid("max-parallel must be at least 1".to_string());
        }

        if self.steps.is_empty() {
            return invalid("workflow declares no steps".to_string());
        }
        let mut previous: Option<Phase> = None;
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return invalid("step name must not be empty".to_string());
            }
            match (&step.uses, &step.run) {
                (Some(_), Some(_)) | (None, None) => {
                    return invalid(format!(
                        "step '{}' must set exactly one of 'uses' or 'run'",
                        step.name
                    ));
                }
                (Some(action), None) if !KNOWN_ACTIONS.contains(&action.as_str()) => {
                    return invalid(format!("step '{}' uses unknown action '{action}'", step.name));
                }
                _ => {}
            }
            let Some(phase) = step.effective_phase() else {
                return invalid(format!("step '{}' has no phase", step.name));
            };
            if let Some(prev) = previous {
                if phase < prev {
                    return invalid(format!(
                        "step '{}' ({phase}) cannot follow a {prev} step",
                        step.name
                    ));
                }
            }
            previous = Some(phase);

            for text in step.texts() {
                for key in matrix_references(text) {
                    if !axes.contains_key(&key) {
                        return Err(CoreError::UnknownMatrixKey {
                            key,
                            text: text.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
