//! The phase FSM (spec §4.1): `start`/`resume`/`status`/`list`/`delete`/`clean`,
//! driving one workflow through `planning → confirmation → implementation →
//! ci_wait → refactoring → (pr_split) → completed` with a per-phase retry
//! budget and caller-driven confirmation.

use std::path::{Path, PathBuf};

use wfctl_core::{AppError, Phase, PhaseStatus, Plan, TransitionKind, Workflow, WorkflowType};
use wfctl_executor::{execute_streaming, ExecConfig, Progress};
use wfctl_gh::{CIResult, CIWaitOptions, CIWaiter, GhAdapter};
use wfctl_git::GitAdapter;
use wfctl_state::{StateStore, WorkflowSummary};

use crate::config::OrchestratorConfig;
use crate::confirm::ConfirmFn;
use crate::opts::{ResumeOpts, StartOpts};
use crate::prompts::{self, ChildPrPlan};
use crate::skip::{apply_backward_skip, apply_forward_skip, check_forward_prerequisites};

/// Branch name the orchestrator creates for a workflow's implementation worktree.
fn worktree_branch(name: &str) -> String {
    format!("workflow/{name}")
}

/// The PR number recorded by `implementation`, consulted by every later phase.
pub fn pr_number(workflow: &Workflow) -> Option<String> {
    workflow.phase_state(Phase::Implementation).artifact_ref
}

fn load_external_plan(path: &Path) -> Result<Plan, AppError> {
    let bytes = std::fs::read(path).map_err(|_| AppError::ExternalPlanNotFound(path.to_path_buf()))?;
    serde_json::from_slice(&bytes).map_err(|e| AppError::ExternalPlanInvalid(e.to_string()))
}

/// Drives workflows forward. Stateless aside from its configuration: all
/// mutable state lives in the `Workflow` value passed to each call and is
/// persisted through `StateStore` between phase boundaries.
pub struct Orchestrator {
    config: OrchestratorConfig,
    repo_dir: PathBuf,
    state: StateStore,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, repo_dir: impl Into<PathBuf>) -> Self {
        let state = StateStore::new(config.base_dir.clone());
        Self {
            config,
            repo_dir: repo_dir.into(),
            state,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub async fn start(
        &self,
        name: &str,
        description: &str,
        workflow_type: WorkflowType,
        opts: StartOpts,
        confirm: &mut ConfirmFn<'_>,
    ) -> Result<Workflow, AppError> {
        wfctl_state::validate_name(name)?;
        if self.state.exists(name) {
            return Err(AppError::WorkflowExists(name.to_string()));
        }

        let _lock = wfctl_lock::acquire_lock(&self.state.workflow_dir(name), name, "start")
            .map_err(|e| AppError::LockHeld(e.to_string()))?;

        let mut workflow = Workflow::new(name.to_string(), workflow_type, description.to_string());

        if let Some(path) = &opts.external_plan {
            let plan = load_external_plan(path)?;
            self.save_plan(name, &plan)?;
            workflow.external_plan_used = true;
        }

        if let Some(target) = opts.skip_to {
            let has_plan = self.state.has_plan(name) || opts.external_plan.is_some();
            check_forward_prerequisites(target, has_plan, false, false)?;
            apply_forward_skip(&mut workflow, target);
        }

        self.save(&workflow)?;
        self.drive(&mut workflow, confirm).await?;
        Ok(workflow)
    }

    pub async fn resume(
        &self,
        name: &str,
        opts: ResumeOpts,
        confirm: &mut ConfirmFn<'_>,
    ) -> Result<Workflow, AppError> {
        let _lock = wfctl_lock::acquire_lock(&self.state.workflow_dir(name), name, "resume")
            .map_err(|e| AppError::LockHeld(e.to_string()))?;

        let mut workflow = self.state.load(name)?;

        if let Some(path) = &opts.external_plan {
            let plan = load_external_plan(path)?;
            self.save_plan(name, &plan)?;
            workflow.external_plan_used = true;
        }

        if let Some(target) = opts.skip_to {
            if target.precedes(&workflow.current_phase) {
                if !opts.force_backward {
                    return Err(AppError::InvalidSkipTarget(format!(
                        "{target} is behind current phase {}; pass --force to move backward",
                        workflow.current_phase
                    )));
                }
                apply_backward_skip(&mut workflow, target);
            } else if target != workflow.current_phase {
                let confirmation_completed =
                    workflow.phase_state(Phase::Confirmation).status == PhaseStatus::Completed;
                let implementation_completed =
                    workflow.phase_state(Phase::Implementation).status == PhaseStatus::Completed;
                let has_plan = self.state.has_plan(name) || opts.external_plan.is_some();
                check_forward_prerequisites(target, has_plan, confirmation_completed, implementation_completed)?;
                apply_forward_skip(&mut workflow, target);
            }
        }

        self.save(&workflow)?;
        self.drive(&mut workflow, confirm).await?;
        Ok(workflow)
    }

    pub fn status(&self, name: &str) -> Result<Workflow, AppError> {
        self.state.load(name)
    }

    pub fn list(&self) -> Result<Vec<WorkflowSummary>, AppError> {
        self.state.list().map_err(|e| AppError::CorruptState(e.to_string()))
    }

    pub fn delete(&self, name: &str) -> Result<(), AppError> {
        self.state.delete(name)
    }

    pub fn clean(&self) -> Result<Vec<String>, AppError> {
        self.state.clean().map_err(|e| AppError::CorruptState(e.to_string()))
    }

    async fn drive(&self, workflow: &mut Workflow, confirm: &mut ConfirmFn<'_>) -> Result<(), AppError> {
        loop {
            match workflow.current_phase {
                Phase::Planning => self.run_planning(workflow).await?,
                Phase::Confirmation => self.run_confirmation(workflow, confirm)?,
                Phase::Implementation => self.run_implementation(workflow).await?,
                Phase::CiWait => self.run_ci_wait(workflow).await?,
                Phase::Refactoring => self.run_refactoring(workflow).await?,
                Phase::PrSplit => self.run_pr_split(workflow).await?,
                Phase::Completed | Phase::Failed => break,
            }
        }
        Ok(())
    }

    fn save(&self, workflow: &Workflow) -> Result<(), AppError> {
        self.state.save(workflow).map_err(|e| AppError::CorruptState(e.to_string()))
    }

    fn save_plan(&self, name: &str, plan: &Plan) -> Result<(), AppError> {
        self.state.save_plan(name, plan).map_err(|e| AppError::CorruptState(e.to_string()))
    }

    fn repo_ctx<'a>(&'a self, workflow: &'a Workflow) -> &'a Path {
        workflow.worktree_path.as_deref().unwrap_or(&self.repo_dir)
    }

    fn log_progress(&self, phase: Phase, progress: Progress) {
        match progress {
            Progress::Text(text) => tracing::info!(%phase, "{text}"),
            Progress::Other(raw) => tracing::debug!(%phase, ?raw, "assistant event"),
        }
    }

    fn log_ci_progress(&self, progress: wfctl_gh::CIProgress) {
        tracing::debug!(elapsed = ?progress.elapsed, checks = progress.checks.len(), "ci poll");
    }

    fn begin_attempt(&self, workflow: &mut Workflow, phase: Phase) {
        let entry = workflow.phases.entry(phase).or_default();
        entry.status = PhaseStatus::Running;
        entry.started_at = Some(chrono::Utc::now());
        entry.attempts += 1;
        workflow.updated_at = chrono::Utc::now();
    }

    fn advance(&self, workflow: &mut Workflow, to: Phase, kind: TransitionKind) {
        let from = workflow.current_phase;
        workflow.current_phase = to;
        workflow.record_transition(from, to, kind);
    }

    /// Marks `from` completed, clears its `last_error`, and moves
    /// `current_phase` to the next phase in sequence, honoring
    /// `config.split_pr` when leaving `refactoring`.
    fn complete_and_advance(&self, workflow: &mut Workflow, from: Phase, artifact_ref: Option<String>) {
        {
            let entry = workflow.phases.entry(from).or_default();
            entry.status = PhaseStatus::Completed;
            entry.completed_at = Some(chrono::Utc::now());
            entry.last_error = None;
            if artifact_ref.is_some() {
                entry.artifact_ref = artifact_ref;
            }
        }
        let to = match from {
            Phase::Planning => Phase::Confirmation,
            Phase::Confirmation => Phase::Implementation,
            Phase::Implementation => Phase::CiWait,
            Phase::CiWait => Phase::Refactoring,
            Phase::Refactoring => {
                if self.config.split_pr {
                    Phase::PrSplit
                } else {
                    let entry = workflow.phases.entry(Phase::PrSplit).or_default();
                    entry.status = PhaseStatus::Skipped;
                    workflow.skipped_phases.insert(Phase::PrSplit);
                    Phase::Completed
                }
            }
            Phase::PrSplit => Phase::Completed,
            Phase::Completed | Phase::Failed => from,
        };
        self.advance(workflow, to, TransitionKind::Normal);
    }

    /// A phase attempt failed. Consumes one unit of the per-phase retry
    /// budget; once exhausted the whole workflow transitions to `failed`.
    ///
    /// Confirmation rejections do NOT go through this path (see
    /// `reject_confirmation`) — a user saying "no" is not an execution
    /// failure and must not burn down the same budget that protects against
    /// a misbehaving assistant or a flaky `git`/`gh` call.
    fn handle_phase_error(&self, workflow: &mut Workflow, phase: Phase, err: &AppError) {
        let budget = self.config.retry_budget;
        let attempts = workflow.phase_state(phase).attempts;
        let entry = workflow.phases.entry(phase).or_default();
        entry.last_error = Some(err.to_string());
        if attempts >= budget {
            entry.status = PhaseStatus::Failed;
            self.fail_workflow(workflow, phase);
        } else {
            entry.status = PhaseStatus::Pending;
        }
    }

    fn fail_workflow(&self, workflow: &mut Workflow, from: Phase) {
        self.advance(workflow, Phase::Failed, TransitionKind::Normal);
        let _ = from;
    }

    /// Unconditional (budget-exempt) requeue of `planning` after the user
    /// rejects a plan in `confirmation`.
    fn reject_confirmation(&self, workflow: &mut Workflow, feedback: String) {
        workflow.retry_context = Some(feedback);
        workflow.phases.entry(Phase::Planning).or_default().status = PhaseStatus::Pending;
        workflow.phases.entry(Phase::Confirmation).or_default().status = PhaseStatus::Pending;
        self.advance(workflow, Phase::Planning, TransitionKind::Retry);
    }

    /// CI failed during `ci_wait`: this requeues `implementation`, not a
    /// self-retry of `ci_wait` — the phase that needs to change its output is
    /// the one that produced the broken code. Consumes a unit of
    /// `implementation`'s retry budget.
    fn requeue_ci_wait_failure(&self, workflow: &mut Workflow, result: CIResult) {
        let summary = format!(
            "CI failed ({}); failed checks: {}",
            result.status,
            if result.failed_checks.is_empty() {
                "none reported".to_string()
            } else {
                result.failed_checks.join(", ")
            }
        );
        let budget = self.config.retry_budget;
        let impl_attempts = workflow.phase_state(Phase::Implementation).attempts;
        workflow.phases.entry(Phase::CiWait).or_default().status = PhaseStatus::Pending;
        workflow.phases.entry(Phase::CiWait).or_default().last_error = Some(summary.clone());

        if impl_attempts >= budget {
            let entry = workflow.phases.entry(Phase::Implementation).or_default();
            entry.status = PhaseStatus::Failed;
            entry.last_error = Some(summary);
            self.fail_workflow(workflow, Phase::CiWait);
            return;
        }

        workflow.retry_context = Some(summary);
        workflow.phases.entry(Phase::Implementation).or_default().status = PhaseStatus::Pending;
        self.advance(workflow, Phase::Implementation, TransitionKind::Retry);
    }

    async fn run_planning(&self, workflow: &mut Workflow) -> Result<(), AppError> {
        self.begin_attempt(workflow, Phase::Planning);
        self.save(workflow)?;

        let prompt = prompts::planning_prompt(&workflow.description, workflow.workflow_type, workflow.retry_context.as_deref());
        let cfg = ExecConfig {
            claude_path: self.config.claude_path.clone(),
            prompt,
            json_schema: Some(prompts::planning_schema()),
            timeout: self.config.timeout_planning,
            cwd: self.repo_dir.clone(),
            skip_permissions: self.config.skip_permissions,
        };

        let outcome = execute_streaming(cfg, |p| self.log_progress(Phase::Planning, p))
            .await
            .and_then(|result| {
                result
                    .structured_output
                    .ok_or_else(|| AppError::AssistantParseError("planning produced no structured_output".to_string()))
                    .and_then(|v| serde_json::from_value::<Plan>(v).map_err(|e| AppError::AssistantParseError(e.to_string())))
            });

        match outcome {
            Ok(plan) => {
                self.save_plan(&workflow.name, &plan)?;
                workflow.retry_context = None;
                workflow.external_plan_used = false;
                self.complete_and_advance(workflow, Phase::Planning, Some("plan.json".to_string()));
            }
            Err(e) => self.handle_phase_error(workflow, Phase::Planning, &e),
        }
        self.save(workflow)
    }

    fn run_confirmation(&self, workflow: &mut Workflow, confirm: &mut ConfirmFn<'_>) -> Result<(), AppError> {
        self.begin_attempt(workflow, Phase::Confirmation);
        self.save(workflow)?;

        let plan = self.state.load_plan(&workflow.name)?;
        match confirm(&plan) {
            Ok((true, _)) => {
                workflow.retry_context = None;
                self.complete_and_advance(workflow, Phase::Confirmation, None);
            }
            Ok((false, feedback)) => self.reject_confirmation(workflow, feedback),
            Err(e) => self.handle_phase_error(workflow, Phase::Confirmation, &AppError::AssistantUnavailable(e.to_string())),
        }
        self.save(workflow)
    }

    async fn run_implementation(&self, workflow: &mut Workflow) -> Result<(), AppError> {
        self.begin_attempt(workflow, Phase::Implementation);
        self.save(workflow)?;

        match self.do_implementation(workflow).await {
            Ok(pr) => {
                workflow.retry_context = None;
                self.complete_and_advance(workflow, Phase::Implementation, Some(pr));
            }
            Err(e) => self.handle_phase_error(workflow, Phase::Implementation, &e),
        }
        self.save(workflow)
    }

    async fn do_implementation(&self, workflow: &mut Workflow) -> Result<String, AppError> {
        let git = GitAdapter::with_binary(&self.repo_dir, &self.config.git_bin);
        let branch = worktree_branch(&workflow.name);

        let worktree_path = match workflow.worktree_path.clone() {
            Some(path) => path,
            None => {
                let path = self.state.base_dir().join(".worktrees").join(&workflow.name);
                git.worktree_add(&path, &branch, true).await?;
                workflow.worktree_path = Some(path.clone());
                path
            }
        };

        let plan = self.state.load_plan(&workflow.name)?;
        let prompt = prompts::implementation_prompt(&plan, &branch, workflow.retry_context.as_deref());
        let cfg = ExecConfig {
            claude_path: self.config.claude_path.clone(),
            prompt,
            json_schema: None,
            timeout: self.config.timeout_implementation,
            cwd: worktree_path.clone(),
            skip_permissions: self.config.skip_permissions,
        };
        execute_streaming(cfg, |p| self.log_progress(Phase::Implementation, p)).await?;

        git.commit_all(&worktree_path, &format!("{}: {}", workflow.workflow_type, workflow.description))
            .await?;
        git.push(&worktree_path, "origin", &branch).await?;

        match pr_number(workflow) {
            Some(pr) => Ok(pr),
            None => {
                let gh = GhAdapter::with_binary(&worktree_path, &self.config.gh_bin);
                let title = format!("{}: {}", workflow.workflow_type, workflow.description);
                let url = gh.pr_create(&title, &plan.summary, None).await?;
                Ok(GhAdapter::pr_number_from_url(&url).unwrap_or(url))
            }
        }
    }

    async fn run_ci_wait(&self, workflow: &mut Workflow) -> Result<(), AppError> {
        self.begin_attempt(workflow, Phase::CiWait);
        self.save(workflow)?;

        let Some(pr) = pr_number(workflow) else {
            self.handle_phase_error(
                workflow,
                Phase::CiWait,
                &AppError::MissingPrerequisite {
                    phase: Phase::CiWait.to_string(),
                    reason: "no PR recorded by implementation".to_string(),
                },
            );
            return self.save(workflow);
        };

        let gh = GhAdapter::with_binary(self.repo_ctx(workflow), &self.config.gh_bin);
        let waiter = CIWaiter::new(&gh);
        match waiter
            .wait_for_ci_with_progress(&pr, self.config.timeout_implementation, CIWaitOptions::default(), |p| {
                self.log_ci_progress(p)
            })
            .await
        {
            Ok(result) if result.passed => {
                workflow.retry_context = None;
                self.complete_and_advance(workflow, Phase::CiWait, Some(pr));
            }
            Ok(result) => self.requeue_ci_wait_failure(workflow, result),
            Err(e) => self.handle_phase_error(workflow, Phase::CiWait, &e),
        }
        self.save(workflow)
    }

    async fn run_refactoring(&self, workflow: &mut Workflow) -> Result<(), AppError> {
        self.begin_attempt(workflow, Phase::Refactoring);
        self.save(workflow)?;

        match self.do_refactoring(workflow).await {
            Ok(()) => {
                workflow.retry_context = None;
                self.complete_and_advance(workflow, Phase::Refactoring, None);
            }
            Err(e) => self.handle_phase_error(workflow, Phase::Refactoring, &e),
        }
        self.save(workflow)
    }

    async fn do_refactoring(&self, workflow: &mut Workflow) -> Result<(), AppError> {
        let pr = pr_number(workflow).ok_or_else(|| AppError::MissingPrerequisite {
            phase: Phase::Refactoring.to_string(),
            reason: "no PR recorded by implementation".to_string(),
        })?;
        let worktree_path = workflow.worktree_path.clone().ok_or_else(|| AppError::MissingPrerequisite {
            phase: Phase::Refactoring.to_string(),
            reason: "no worktree recorded by implementation".to_string(),
        })?;
        let plan = self.state.load_plan(&workflow.name)?;
        let branch = worktree_branch(&workflow.name);

        let git = GitAdapter::with_binary(&self.repo_dir, &self.config.git_bin);
        let gh = GhAdapter::with_binary(&worktree_path, &self.config.gh_bin);

        let prompt = prompts::refactoring_prompt(&plan, &pr, workflow.retry_context.as_deref());
        let cfg = ExecConfig {
            claude_path: self.config.claude_path.clone(),
            prompt,
            json_schema: None,
            timeout: self.config.timeout_refactoring,
            cwd: worktree_path.clone(),
            skip_permissions: self.config.skip_permissions,
        };
        execute_streaming(cfg, |p| self.log_progress(Phase::Refactoring, p)).await?;

        if git.commit_all(&worktree_path, "refactor").await?.is_some() {
            git.push(&worktree_path, "origin", &branch).await?;
            let waiter = CIWaiter::new(&gh);
            let result = waiter
                .wait_for_ci_with_progress(&pr, self.config.timeout_refactoring, CIWaitOptions::default(), |p| {
                    self.log_ci_progress(p)
                })
                .await?;
            if !result.passed {
                return Err(AppError::CIPollFailure(format!(
                    "refactoring CI failed ({}): {}",
                    result.status,
                    result.failed_checks.join(", ")
                )));
            }
        }
        Ok(())
    }

    async fn run_pr_split(&self, workflow: &mut Workflow) -> Result<(), AppError> {
        self.begin_attempt(workflow, Phase::PrSplit);
        self.save(workflow)?;

        match self.do_pr_split(workflow).await {
            Ok(()) => {
                workflow.retry_context = None;
                self.complete_and_advance(workflow, Phase::PrSplit, None);
            }
            Err(e) => self.handle_phase_error(workflow, Phase::PrSplit, &e),
        }
        self.save(workflow)
    }

    async fn do_pr_split(&self, workflow: &mut Workflow) -> Result<(), AppError> {
        let pr = pr_number(workflow).ok_or_else(|| AppError::MissingPrerequisite {
            phase: Phase::PrSplit.to_string(),
            reason: "no PR recorded by implementation".to_string(),
        })?;
        let worktree_path = workflow.worktree_path.clone().ok_or_else(|| AppError::MissingPrerequisite {
            phase: Phase::PrSplit.to_string(),
            reason: "no worktree recorded by implementation".to_string(),
        })?;
        let gh = GhAdapter::with_binary(&worktree_path, &self.config.gh_bin);

        let prompt = prompts::pr_split_prompt(&pr);
        let cfg = ExecConfig {
            claude_path: self.config.claude_path.clone(),
            prompt,
            json_schema: Some(prompts::pr_split_schema()),
            timeout: self.config.timeout_pr_split,
            cwd: worktree_path,
            skip_permissions: self.config.skip_permissions,
        };
        let result = execute_streaming(cfg, |p| self.log_progress(Phase::PrSplit, p)).await?;
        let child_plan: ChildPrPlan = match result.structured_output {
            Some(v) => serde_json::from_value(v).map_err(|e| AppError::AssistantParseError(e.to_string()))?,
            None => return Err(AppError::AssistantParseError("pr_split produced no structured_output".to_string())),
        };

        for child in &child_plan.children {
            gh.pr_create(&child.title, &child.body, None).await?;
        }
        gh.pr_close(&pr).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;
    use tokio::process::Command as TokioCommand;
    use wfctl_core::PhaseStatus;

    fn write_script(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A `claude` stand-in that inspects `--output-schema` to decide which
    /// structured output to emit: the Plan shape for planning, the child-PR
    /// shape for pr_split, and a bare success result otherwise.
    const CLAUDE_FIXTURE: &str = r#"#!/bin/sh
schema=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--output-schema" ]; then
    schema="$arg"
  fi
  prev="$arg"
done
case "$schema" in
  *children*)
    echo '{"type":"result","subtype":"success","result":"split","structured_output":{"children":[{"title":"part1","body":"b1"}]}}'
    ;;
  *summary*)
    echo '{"type":"result","subtype":"success","result":"planned","structured_output":{"summary":"add hello","context_type":"feature","complexity":"low","estimated_total_lines":10,"estimated_total_files":1}}'
    ;;
  *)
    echo '{"type":"result","subtype":"success","result":"done"}'
    ;;
esac
"#;

    const GH_FIXTURE_ALWAYS_PASS: &str = r#"#!/bin/sh
case "$1 $2" in
  "pr create") echo "https://github.com/o/r/pull/7" ;;
  "pr checks") echo '[{"name":"build","state":"SUCCESS"}]' ;;
  *) : ;;
esac
"#;

    fn gh_fixture_fail_then_pass(dir: &Path) -> PathBuf {
        let counter = dir.join("ci_calls");
        let script = dir.join("gh");
        write_script(
            &script,
            &format!(
                r#"#!/bin/sh
case "$1 $2" in
  "pr create") echo "https://github.com/o/r/pull/7" ;;
  "pr checks")
    n=$(cat "{counter}" 2>/dev/null || echo 0)
    echo $((n+1)) > "{counter}"
    if [ "$n" = "0" ]; then
      echo '[{{"name":"build","state":"FAILURE"}}]'
    else
      echo '[{{"name":"build","state":"SUCCESS"}}]'
    fi
    ;;
  *) : ;;
esac
"#,
                counter = counter.display()
            ),
        );
        script
    }

    async fn init_repo_with_origin(base: &Path) -> PathBuf {
        let origin = base.join("origin.git");
        let repo = base.join("repo");
        TokioCommand::new("git").args(["init", "--bare"]).arg(&origin).output().await.unwrap();
        TokioCommand::new("git").arg("init").arg(&repo).output().await.unwrap();
        for (k, v) in [("user.email", "test@example.com"), ("user.name", "Test")] {
            TokioCommand::new("git").args(["config", k, v]).current_dir(&repo).output().await.unwrap();
        }
        std::fs::write(repo.join("README.md"), "hello\n").unwrap();
        TokioCommand::new("git").args(["add", "-A"]).current_dir(&repo).output().await.unwrap();
        TokioCommand::new("git").args(["commit", "-m", "init"]).current_dir(&repo).output().await.unwrap();
        TokioCommand::new("git")
            .args(["remote", "add", "origin"])
            .arg(&origin)
            .current_dir(&repo)
            .output()
            .await
            .unwrap();
        let branch_out = TokioCommand::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(&repo)
            .output()
            .await
            .unwrap();
        let branch = String::from_utf8_lossy(&branch_out.stdout).trim().to_string();
        TokioCommand::new("git")
            .args(["push", "-u", "origin", &branch])
            .current_dir(&repo)
            .output()
            .await
            .unwrap();
        repo
    }

    fn base_config(base_dir: &Path, claude: &Path, gh: &Path) -> OrchestratorConfig {
        OrchestratorConfig {
            base_dir: base_dir.to_path_buf(),
            split_pr: false,
            claude_path: claude.to_string_lossy().to_string(),
            skip_permissions: false,
            timeout_planning: std::time::Duration::from_secs(5),
            timeout_implementation: std::time::Duration::from_secs(5),
            timeout_refactoring: std::time::Duration::from_secs(5),
            timeout_pr_split: std::time::Duration::from_secs(5),
            retry_budget: 2,
            git_bin: "git".to_string(),
            gh_bin: gh.to_string_lossy().to_string(),
        }
    }

    #[tokio::test]
    async fn full_workflow_completes_without_pr_split() {
        let tmp = tempdir().unwrap();
        let repo = init_repo_with_origin(tmp.path()).await;
        let claude = tmp.path().join("claude");
        write_script(&claude, CLAUDE_FIXTURE);
        let gh = tmp.path().join("gh");
        write_script(&gh, GH_FIXTURE_ALWAYS_PASS);

        let config = base_config(&tmp.path().join("state"), &claude, &gh);
        let orchestrator = Orchestrator::new(config, &repo);

        let mut confirm = |_: &Plan| Ok((true, String::new()));
        let workflow = orchestrator
            .start("w1", "add hello", WorkflowType::Feature, StartOpts::default(), &mut confirm)
            .await
            .unwrap();

        assert_eq!(workflow.current_phase, Phase::Completed);
        for phase in [Phase::Planning, Phase::Confirmation, Phase::Implementation, Phase::CiWait, Phase::Refactoring] {
            assert_eq!(workflow.phase_state(phase).status, PhaseStatus::Completed, "{phase}");
        }
        assert_eq!(workflow.phase_state(Phase::PrSplit).status, PhaseStatus::Skipped);
        assert!(orchestrator.state().has_plan("w1"));
    }

    #[tokio::test]
    async fn confirmation_rejection_requeues_planning_then_succeeds() {
        let tmp = tempdir().unwrap();
        let repo = init_repo_with_origin(tmp.path()).await;
        let claude = tmp.path().join("claude");
        write_script(&claude, CLAUDE_FIXTURE);
        let gh = tmp.path().join("gh");
        write_script(&gh, GH_FIXTURE_ALWAYS_PASS);

        let config = base_config(&tmp.path().join("state"), &claude, &gh);
        let orchestrator = Orchestrator::new(config, &repo);

        let mut calls = 0;
        let mut confirm = move |_: &Plan| {
            calls += 1;
            if calls == 1 {
                Ok((false, "needs more detail".to_string()))
            } else {
                Ok((true, String::new()))
            }
        };
        let workflow = orchestrator
            .start("w2", "add hello", WorkflowType::Feature, StartOpts::default(), &mut confirm)
            .await
            .unwrap();

        assert_eq!(workflow.current_phase, Phase::Completed);
        assert!(workflow.phase_history.iter().any(|t| t.kind == TransitionKind::Retry && t.to == Phase::Planning));
        assert_eq!(workflow.phase_state(Phase::Planning).attempts, 2);
    }

    #[tokio::test]
    async fn ci_failure_requeues_implementation_then_succeeds() {
        let tmp = tempdir().unwrap();
        let repo = init_repo_with_origin(tmp.path()).await;
        let claude = tmp.path().join("claude");
        write_script(&claude, CLAUDE_FIXTURE);
        let gh = gh_fixture_fail_then_pass(tmp.path());

        let config = base_config(&tmp.path().join("state"), &claude, &gh);
        let orchestrator = Orchestrator::new(config, &repo);

        let mut confirm = |_: &Plan| Ok((true, String::new()));
        let workflow = orchestrator
            .start("w3", "add hello", WorkflowType::Feature, StartOpts::default(), &mut confirm)
            .await
            .unwrap();

        assert_eq!(workflow.current_phase, Phase::Completed);
        assert!(workflow
            .phase_history
            .iter()
            .any(|t| t.kind == TransitionKind::Retry && t.to == Phase::Implementation));
        assert_eq!(workflow.phase_state(Phase::Implementation).attempts, 2);
    }

    #[tokio::test]
    async fn retry_budget_exhausted_fails_the_workflow() {
        let tmp = tempdir().unwrap();
        let repo = init_repo_with_origin(tmp.path()).await;
        // A `claude` that always exits non-zero without a result line.
        let claude = tmp.path().join("claude");
        write_script(&claude, "#!/bin/sh\nexit 1\n");
        let gh = tmp.path().join("gh");
        write_script(&gh, GH_FIXTURE_ALWAYS_PASS);

        let config = base_config(&tmp.path().join("state"), &claude, &gh);
        let orchestrator = Orchestrator::new(config, &repo);

        let mut confirm = |_: &Plan| Ok((true, String::new()));
        let workflow = orchestrator
            .start("w4", "add hello", WorkflowType::Feature, StartOpts::default(), &mut confirm)
            .await
            .unwrap();

        assert_eq!(workflow.current_phase, Phase::Failed);
        assert_eq!(workflow.phase_state(Phase::Planning).status, PhaseStatus::Failed);
        assert_eq!(workflow.phase_state(Phase::Planning).attempts, 2);
    }

    #[tokio::test]
    async fn start_rejects_duplicate_name() {
        let tmp = tempdir().unwrap();
        let repo = init_repo_with_origin(tmp.path()).await;
        let claude = tmp.path().join("claude");
        write_script(&claude, CLAUDE_FIXTURE);
        let gh = tmp.path().join("gh");
        write_script(&gh, GH_FIXTURE_ALWAYS_PASS);
        let config = base_config(&tmp.path().join("state"), &claude, &gh);
        let orchestrator = Orchestrator::new(config, &repo);

        let mut confirm = |_: &Plan| Ok((true, String::new()));
        orchestrator
            .start("dup", "x", WorkflowType::Fix, StartOpts::default(), &mut confirm)
            .await
            .unwrap();

        let err = orchestrator
            .start("dup", "x", WorkflowType::Fix, StartOpts::default(), &mut confirm)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::WorkflowExists(_)));
    }

    #[tokio::test]
    async fn start_with_skip_to_confirmation_without_plan_errors() {
        let tmp = tempdir().unwrap();
        let repo = init_repo_with_origin(tmp.path()).await;
        let claude = tmp.path().join("claude");
        write_script(&claude, CLAUDE_FIXTURE);
        let gh = tmp.path().join("gh");
        write_script(&gh, GH_FIXTURE_ALWAYS_PASS);
        let config = base_config(&tmp.path().join("state"), &claude, &gh);
        let orchestrator = Orchestrator::new(config, &repo);

        let mut confirm = |_: &Plan| Ok((true, String::new()));
        let opts = StartOpts {
            skip_to: Some(Phase::Confirmation),
            external_plan: None,
        };
        let err = orchestrator
            .start("w5", "add hello", WorkflowType::Feature, opts, &mut confirm)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingPrerequisite { .. }));
    }

    #[tokio::test]
    async fn list_and_delete_roundtrip() {
        let tmp = tempdir().unwrap();
        let repo = init_repo_with_origin(tmp.path()).await;
        let claude = tmp.path().join("claude");
        write_script(&claude, CLAUDE_FIXTURE);
        let gh = tmp.path().join("gh");
        write_script(&gh, GH_FIXTURE_ALWAYS_PASS);
        let config = base_config(&tmp.path().join("state"), &claude, &gh);
        let orchestrator = Orchestrator::new(config, &repo);

        let mut confirm = |_: &Plan| Ok((true, String::new()));
        orchestrator
            .start("w6", "add hello", WorkflowType::Feature, StartOpts::default(), &mut confirm)
            .await
            .unwrap();

        let listed = orchestrator.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "w6");
        assert_eq!(listed[0].current_phase, Phase::Completed);

        let removed = orchestrator.clean().unwrap();
        assert_eq!(removed, vec!["w6".to_string()]);
        assert!(orchestrator.status("w6").is_err());
    }
}
