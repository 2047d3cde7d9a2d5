//! Typed, testable wrapper over the `git` CLI (spec §6).
//!
//! Mirrors the teacher's `csa-session`/`csa-todo` git modules: shell out to a
//! real `git` binary, `Context`-wrap every failure, surface stderr on a
//! non-zero exit. Unlike those sync wrappers this one is tokio-async, since
//! the orchestrator that consumes it already runs on a tokio runtime for
//! assistant subprocess I/O and CI polling.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use wfctl_core::AppError;

/// Wraps `git` invocations rooted at a repository directory.
///
/// The binary name is overridable so tests can point it at a small shell
/// script stand-in instead of a real `git` (spec's testing style: real
/// `Command`s against fixture scripts, no mock trait).
#[derive(Debug, Clone)]
pub struct GitAdapter {
    repo_dir: PathBuf,
    git_bin: String,
}

impl GitAdapter {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            git_bin: "git".to_string(),
        }
    }

    /// Construct with an overridden binary, for pointing tests at a fixture
    /// script. This is the adapter's "dry run" mode referenced in DESIGN.md.
    pub fn with_binary(repo_dir: impl Into<PathBuf>, git_bin: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            git_bin: git_bin.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, AppError> {
        let output = Command::new(&self.git_bin)
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .with_context(|| format!("failed to run git {}", args.join(" ")))
            .map_err(|e| AppError::GitFailure(e.to_string()))?;

        if !output.status.success() {
            return Err(AppError::GitFailure(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// The current branch name, or an error if the HEAD is detached or the
    /// directory is not inside a git repository.
    ///
    /// Consulted by `wfctl-hooks`' R2 rule when a `git push` has no explicit
    /// branch argument (spec §4.6).
    pub async fn current_branch(&self) -> Result<String, AppError> {
        let name = self
            .run(&self.repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        if name == "HEAD" {
            return Err(AppError::GitFailure("HEAD is detached".to_string()));
        }
        Ok(name)
    }

    /// Create a worktree at `path` checked out to `branch`, creating the
    /// branch from the current HEAD first when `create_branch` is set.
    pub async fn worktree_add(&self, path: &Path, branch: &str, create_branch: bool) -> Result<(), AppError> {
        let path_str = path.to_string_lossy().to_string();
        let args: Vec<&str> = if create_branch {
            vec!["worktree", "add", "-b", branch, &path_str]
        } else {
            vec!["worktree", "add", &path_str, branch]
        };
        self.run(&self.repo_dir, &args).await?;
        Ok(())
    }

    pub async fn worktree_remove(&self, path: &Path) -> Result<(), AppError> {
        let path_str = path.to_string_lossy().to_string();
        self.run(&self.repo_dir, &["worktree", "remove", "--force", &path_str])
            .await?;
        Ok(())
    }

    pub async fn checkout(&self, dir: &Path, git_ref: &str) -> Result<(), AppError> {
        self.run(dir, &["checkout", git_ref]).await?;
        Ok(())
    }

    pub async fn create_branch(&self, dir: &Path, name: &str) -> Result<(), AppError> {
        self.run(dir, &["checkout", "-b", name]).await?;
        Ok(())
    }

    /// Stage everything and commit. Returns `None` if there was nothing
    /// staged to commit (mirrors the teacher's `git diff --cached --quiet`
    /// check before committing).
    pub async fn commit_all(&self, dir: &Path, message: &str) -> Result<Option<String>, AppError> {
        self.run(dir, &["add", "-A"]).await?;

        let status = Command::new(&self.git_bin)
            .args(["diff", "--cached", "--quiet"])
            .current_dir(dir)
            .status()
            .await
            .map_err(|e| AppError::GitFailure(format!("git diff --cached: {e}")))?;

        match status.code() {
            Some(0) => return Ok(None),
            Some(1) => {}
            Some(code) => {
                return Err(AppError::GitFailure(format!(
                    "git diff --cached failed with exit {code}"
                )))
            }
            None => return Err(AppError::GitFailure("git diff --cached terminated by signal".to_string())),
        }

        self.run(dir, &["commit", "-m", message]).await?;
        let hash = self.run(dir, &["rev-parse", "--short", "HEAD"]).await?;
        Ok(Some(hash))
    }

    pub async fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), AppError> {
        self.run(dir, &["push", "-u", remote, branch]).await?;
        Ok(())
    }

    pub async fn log(&self, dir: &Path, args: &[&str]) -> Result<String, AppError> {
        let mut full = vec!["log"];
        full.extend_from_slice(args);
        self.run(dir, &full).await
    }

    pub async fn diff(&self, dir: &Path, args: &[&str]) -> Result<String, AppError> {
        let mut full = vec!["diff"];
        full.extend_from_slice(args);
        self.run(dir, &full).await
    }

    pub async fn cherry_pick(&self, dir: &Path, commit: &str) -> Result<(), AppError> {
        self.run(dir, &["cherry-pick", commit]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::process::Command as TokioCommand;

    async fn init_repo(dir: &Path) {
        TokioCommand::new("git").arg("init").current_dir(dir).output().await.unwrap();
        TokioCommand::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        TokioCommand::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        TokioCommand::new("git").args(["add", "-A"]).current_dir(dir).output().await.unwrap();
        TokioCommand::new("git")
            .args(["commit", "-m", "init"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn current_branch_reports_initial_branch() {
        let dir = tempdir().unwrap();
        init_repo(dir.path()).await;
        let adapter = GitAdapter::new(dir.path());
        let branch = adapter.current_branch().await.unwrap();
        assert!(!branch.is_empty());
        assert_ne!(branch, "HEAD");
    }

    #[tokio::test]
    async fn commit_all_returns_none_when_clean() {
        let dir = tempdir().unwrap();
        init_repo(dir.path()).await;
        let adapter = GitAdapter::new(dir.path());
        let result = adapter.commit_all(dir.path(), "no-op").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn commit_all_commits_staged_changes() {
        let dir = tempdir().unwrap();
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("new.txt"), "content\n").unwrap();
        let adapter = GitAdapter::new(dir.path());
        let result = adapter.commit_all(dir.path(), "add new file").await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn worktree_add_and_remove_roundtrip() {
        let dir = tempdir().unwrap();
        init_repo(dir.path()).await;
        let adapter = GitAdapter::new(dir.path());
        let wt_dir = dir.path().join("wt");
        adapter.worktree_add(&wt_dir, "feature/x", true).await.unwrap();
        assert!(wt_dir.join(".git").exists());
        adapter.worktree_remove(&wt_dir).await.unwrap();
        assert!(!wt_dir.exists());
    }

    #[tokio::test]
    async fn create_branch_then_checkout_back() {
        let dir = tempdir().unwrap();
        init_repo(dir.path()).await;
        let adapter = GitAdapter::new(dir.path());
        let original = adapter.current_branch().await.unwrap();
        adapter.create_branch(dir.path(), "feature/y").await.unwrap();
        assert_eq!(adapter.current_branch().await.unwrap(), "feature/y");
        adapter.checkout(dir.path(), &original).await.unwrap();
        assert_eq!(adapter.current_branch().await.unwrap(), original);
    }

    #[tokio::test]
    async fn failing_command_surfaces_stderr_in_git_failure() {
        let dir = tempdir().unwrap();
        init_repo(dir.path()).await;
        let adapter = GitAdapter::new(dir.path());
        let err = adapter.checkout(dir.path(), "no-such-branch").await.unwrap_err();
        assert!(matches!(err, AppError::GitFailure(_)));
    }
}
