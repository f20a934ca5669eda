//! Git helpers: revision capture and changed-path discovery.

use std::path::Path;
use std::process::Command;

use crate::error::{CoreError, Result};

fn git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| CoreError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoreError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Capture the HEAD commit SHA of the repository at `repo_dir`.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let sha = git(repo_dir, &["rev-parse", "HEAD"])?;
    if sha.is_empty() {
        return Err(CoreError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Name of the currently checked-out branch (`HEAD` when detached).
pub fn current_branch(repo_dir: &Path) -> Result<String> {
    git(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// Paths changed in a revision range such as `origin/main..HEAD`.
pub fn changed_paths(repo_dir: &Path, range: &str) -> Result<Vec<String>> {
    let out = git(repo_dir, &["diff", "--name-only", range])?;
    Ok(out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
