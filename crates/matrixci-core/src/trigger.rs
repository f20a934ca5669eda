//! Trigger evaluation: does a repository event start the job?
//!
//! Rules, in order:
//! 1. The event type must be configured (`push`, `pull_request`, `manual`).
//! 2. The branch (target branch for pull requests) must match a branch glob;
//!    an empty branch list accepts any branch.
//! 3. `paths-ignore`: skip when every changed path is ignored. An empty
//!    change set counts as fully ignored.
//! 4. `paths`: run only when some changed path matches.
//!
//! Manual events bypass branch and path filters.

use serde::{Deserialize, Serialize};

use crate::pattern::{any_match, normalize_path};
use crate::workflow::{EventFilter, Triggers};

/// Kind of repository event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Manual,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Manual => "manual",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository event to evaluate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoEvent {
    pub kind: EventKind,
    /// Pushed branch, or target branch of a pull request.
    pub branch: String,
    pub changed_paths: Vec<String>,
}

impl RepoEvent {
    pub fn push(branch: impl Into<String>, changed: &[&str]) -> Self {
        Self::new(EventKind::Push, branch, changed)
    }

    pub fn pull_request(target: impl Into<String>, changed: &[&str]) -> Self {
        Self::new(EventKind::PullRequest, target, changed)
    }

    pub fn manual(branch: impl Into<String>) -> Self {
        Self::new(EventKind::Manual, branch, &[])
    }

    fn new(kind: EventKind, branch: impl Into<String>, changed: &[&str]) -> Self {
        Self {
            kind,
            branch: branch.into(),
            changed_paths: changed.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Why a trigger did not fire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    EventNotConfigured,
    BranchFiltered { branch: String },
    AllPathsIgnored,
    NoPathMatched,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::EventNotConfigured => f.write_str("event type not configured"),
            SkipReason::BranchFiltered { branch } => {
                write!(f, "branch '{}' does not match the branch filter", branch)
            }
            SkipReason::AllPathsIgnored => f.write_str("every changed path is ignored"),
            SkipReason::NoPathMatched => f.write_str("no changed path matches the path filter"),
        }
    }
}

/// Outcome of trigger evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TriggerDecision {
    Run {
        /// Changed paths that were not filtered out.
        relevant_paths: Vec<String>,
    },
    Skip(SkipReason),
}

impl TriggerDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, TriggerDecision::Run { .. })
    }
}

/// Evaluates repository events against a workflow's triggers.
pub struct TriggerEvaluator<'a> {
    triggers: &'a Triggers,
}

impl<'a> TriggerEvaluator<'a> {
    pub fn new(triggers: &'a Triggers) -> Self {
        Self { triggers }
    }

    pub fn evaluate(&self, event: &RepoEvent) -> TriggerDecision {
        let decision = self.decide(event);
        crate::obs::emit_trigger_evaluated(
            event.kind.as_str(),
            &event.branch,
            event.changed_paths.len(),
            decision.should_run(),
        );
        decision
    }

    fn decide(&self, event: &RepoEvent) -> TriggerDecision {
        let filter = match event.kind {
            EventKind::Manual => {
                return if self.triggers.manual {
                    TriggerDecision::Run {
                        relevant_paths: event.changed_paths.clone(),
                    }
                } else {
                    TriggerDecision::Skip(SkipReason::EventNotConfigured)
                };
            }
            EventKind::Push => self.triggers.push.as_ref(),
            EventKind::PullRequest => self.triggers.pull_request.as_ref(),
        };
        let Some(filter) = filter else {
            return TriggerDecision::Skip(SkipReason::EventNotConfigured);
        };

        if !filter.branches.is_empty() && !any_match(&filter.branches, &event.branch) {
            return TriggerDecision::Skip(SkipReason::BranchFiltered {
                branch: event.branch.clone(),
            });
        }

        paths_decision(filter, &event.changed_paths)
    }
}

fn paths_decision(filter: &EventFilter, changed: &[String]) -> TriggerDecision {
    if !filter.paths_ignore.is_empty() {
        let relevant: Vec<String> = changed
            .iter()
            .filter(|p| !any_match(&filter.paths_ignore, p))
            .map(|p| normalize_path(p).to_string())
            .collect();
        return if relevant.is_empty() {
            TriggerDecision::Skip(SkipReason::AllPathsIgnored)
        } else {
            TriggerDecision::Run {
                relevant_paths: relevant,
            }
        };
    }

    if !filter.paths.is_empty() {
        let relevant: Vec<String> = changed
            .iter()
            .filter(|p| any_match(&filter.paths, p))
            .map(|p| normalize_path(p).to_string())
            .collect();
        return if relevant.is_empty() {
            TriggerDecision::Skip(SkipReason::NoPathMatched)
        } else {
            TriggerDecision::Run {
                relevant_paths: relevant,
            }
        };
    }

    TriggerDecision::Run {
        relevant_paths: changed.iter().map(|p| normalize_path(p).to_string()).collect(),
    }
}
