//! Typed, testable wrapper over the `gh` CLI (spec §6): PR lifecycle, the
//! generic `api` escape hatch, and `run rerun`.
//!
//! Same shelling-out style as `wfctl-git`: tokio `Command`, `Context`-wrapped
//! failures, stderr surfaced on non-zero exit. The binary name is overridable
//! for tests, mirroring `GitAdapter::with_binary`.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use wfctl_core::AppError;

/// One GitHub Actions / status check as reported by `gh pr checks --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    pub name: String,
    /// `"SUCCESS" | "FAILURE" | "PENDING" | "CANCELLED" | "SKIPPED" | ...`
    pub state: String,
}

impl CheckRun {
    pub fn is_terminal(&self) -> bool {
        !matches!(self.state.as_str(), "PENDING" | "QUEUED" | "IN_PROGRESS" | "")
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.state.as_str(), "FAILURE" | "CANCELLED" | "TIMED_OUT" | "ERROR")
    }
}

/// Wraps `gh` invocations rooted at a repository/worktree directory.
#[derive(Debug, Clone)]
pub struct GhAdapter {
    repo_dir: PathBuf,
    gh_bin: String,
}

impl GhAdapter {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            gh_bin: "gh".to_string(),
        }
    }

    /// Construct with an overridden binary, for pointing tests at a fixture
    /// script (the adapter's "dry run" mode).
    pub fn with_binary(repo_dir: impl Into<PathBuf>, gh_bin: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            gh_bin: gh_bin.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn run(&self, args: &[&str]) -> Result<String, AppError> {
        let output = Command::new(&self.gh_bin)
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .with_context(|| format!("failed to run gh {}", args.join(" ")))
            .map_err(|e| AppError::GhFailure(e.to_string()))?;

        if !output.status.success() {
            return Err(AppError::GhFailure(format!(
                "gh {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `gh pr create --title ... --body ... [--base ...]`. Returns the PR URL.
    pub async fn pr_create(&self, title: &str, body: &str, base: Option<&str>) -> Result<String, AppError> {
        let mut args = vec!["pr", "create", "--title", title, "--body", body];
        if let Some(base) = base {
            args.push("--base");
            args.push(base);
        }
        self.run(&args).await
    }

    /// `gh pr view <pr> --json <fields>`, parsed as arbitrary JSON.
    pub async fn pr_view(&self, pr: &str, fields: &str) -> Result<serde_json::Value, AppError> {
        let raw = self.run(&["pr", "view", pr, "--json", fields]).await?;
        serde_json::from_str(&raw).map_err(|e| AppError::GhFailure(format!("malformed gh pr view JSON: {e}")))
    }

    /// The PR's base (target) branch, consulted by R5 (`pr-merge`) and the
    /// `ci_wait`/`pr_split` phases.
    pub async fn get_pr_base_branch(&self, pr: &str) -> Result<String, AppError> {
        let value = self.pr_view(pr, "baseRefName").await?;
        value
            .get("baseRefName")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::GhFailure(format!("no baseRefName in gh pr view output for {pr}")))
    }

    /// Extract the PR number from a `gh pr create` URL, e.g.
    /// `https://github.com/o/r/pull/42` → `42`.
    pub fn pr_number_from_url(url: &str) -> Option<String> {
        url.rsplit('/').next().filter(|s| s.chars().all(|c| c.is_ascii_digit())).map(str::to_string)
    }

    pub async fn pr_checks(&self, pr: &str) -> Result<Vec<CheckRun>, AppError> {
        let raw = self
            .run(&["pr", "checks", pr, "--json", "name,state"])
            .await
            .map_err(|e| {
                let msg = e.to_string().to_ascii_lowercase();
                if msg.contains("no checks") || msg.contains("no pull requests found") || msg.contains("could not resolve") {
                    AppError::CIUnavailable(e.to_string())
                } else {
                    e
                }
            })?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|e| AppError::GhFailure(format!("malformed gh pr checks JSON: {e}")))
    }

    pub async fn pr_edit(&self, pr: &str, body: &str) -> Result<(), AppError> {
        self.run(&["pr", "edit", pr, "--body", body]).await?;
        Ok(())
    }

    pub async fn pr_close(&self, pr: &str) -> Result<(), AppError> {
        self.run(&["pr", "close", pr]).await?;
        Ok(())
    }

    pub async fn pr_merge(&self, pr: &str, squash: bool) -> Result<(), AppError> {
        let mut args = vec!["pr", "merge", pr];
        if squash {
            args.push("--squash");
        }
        self.run(&args).await?;
        Ok(())
    }

    /// Generic REST escape hatch: `gh api [-X METHOD] <path> [-f key=value ...]`.
    pub async fn api(&self, method: &str, path: &str, fields: &[(&str, &str)]) -> Result<serde_json::Value, AppError> {
        let mut args = vec!["api", "-X", method, path];
        let field_args: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
        for field in &field_args {
            args.push("-f");
            args.push(field);
        }
        let raw = self.run(&args).await?;
        if raw.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&raw).map_err(|e| AppError::GhFailure(format!("malformed gh api JSON: {e}")))
    }

    pub async fn run_rerun(&self, run_id: &str) -> Result<(), AppError> {
        self.run(&["run", "rerun", run_id]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_number_from_url_extracts_trailing_digits() {
        assert_eq!(
            GhAdapter::pr_number_from_url("https://github.com/o/r/pull/42"),
            Some("42".to_string())
        );
        assert_eq!(GhAdapter::pr_number_from_url("not-a-url"), None);
    }

    #[test]
    fn check_run_terminal_and_failure_classification() {
        let pending = CheckRun { name: "build".into(), state: "PENDING".into() };
        let success = CheckRun { name: "build".into(), state: "SUCCESS".into() };
        let failure = CheckRun { name: "build".into(), state: "FAILURE".into() };
        assert!(!pending.is_terminal());
        assert!(success.is_terminal() && !success.is_failure());
        assert!(failure.is_terminal() && failure.is_failure());
    }
}
