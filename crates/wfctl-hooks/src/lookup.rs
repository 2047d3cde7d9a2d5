//! Small synchronous lookups a couple of rules need from `git`/`gh`.
//!
//! The hook binary evaluates one `ToolInput` per process invocation and must
//! return fast, so these shell out directly with `std::process::Command`
//! rather than pulling in `wfctl-git`/`wfctl-gh`'s async adapters (which the
//! long-lived orchestrator process uses instead). Trait objects keep rules
//! testable without touching a real `git`/`gh` binary.

use std::process::Command;

/// Resolves the current branch for an implicit (branchless) `git push`.
pub trait CurrentBranchLookup: Send + Sync {
    /// `Err` means the lookup itself failed (e.g. detached HEAD, not a repo);
    /// rules that consult this fail *open* per spec §4.6/§7.
    fn current_branch(&self) -> Result<String, String>;
}

/// Resolves a PR's base branch, used by R5 (`pr-merge`).
pub trait PrBaseBranchLookup: Send + Sync {
    fn pr_base_branch(&self, pr: &str) -> Result<String, String>;
}

/// Shells out to `git rev-parse --abbrev-ref HEAD` in the given directory.
pub struct ShellCurrentBranch {
    pub cwd: std::path::PathBuf,
}

impl CurrentBranchLookup for ShellCurrentBranch {
    fn current_branch(&self) -> Result<String, String> {
        let output = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(&self.cwd)
            .output()
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if branch == "HEAD" {
            return Err("HEAD is detached".to_string());
        }
        Ok(branch)
    }
}

/// Shells out to `gh pr view <pr> --json baseRefName` in the given directory.
pub struct ShellPrBaseBranch {
    pub cwd: std::path::PathBuf,
}

impl PrBaseBranchLookup for ShellPrBaseBranch {
    fn pr_base_branch(&self, pr: &str) -> Result<String, String> {
        let output = Command::new("gh")
            .args(["pr", "view", pr, "--json", "baseRefName"])
            .current_dir(&self.cwd)
            .output()
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        let value: serde_json::Value = serde_json::from_str(raw.trim()).map_err(|e| e.to_string())?;
        value
            .get("baseRefName")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| "no baseRefName in gh pr view output".to_string())
    }
}
