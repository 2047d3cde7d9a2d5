//! Atomic on-disk persistence for `Workflow` state and its sibling `Plan`
//! artifact (spec §4.3).
//!
//! One directory per workflow under a configurable base directory
//! (`.claude/workflow` by default), containing `state.json` and, once
//! planning completes, `plan.json`. Writes go through a temp-file-then-rename
//! so a reader never observes a half-written file; directories are created
//! with `0755` and files with `0644`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use wfctl_core::{AppError, Phase, PhaseStatus, Plan, Workflow};

const STATE_FILE_NAME: &str = "state.json";
const PLAN_FILE_NAME: &str = "plan.json";

/// Validate a workflow name per spec §3: no path separators, no `..`.
pub fn validate_name(name: &str) -> Result<(), AppError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.split('/').any(|seg| seg == "..")
        || name == ".."
        || name == "."
    {
        return Err(AppError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Summary record returned by `StateStore::list`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub workflow_type: wfctl_core::WorkflowType,
    pub current_phase: Phase,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Owns the on-disk representation of every workflow under `base_dir`.
#[derive(Debug, Clone)]
pub struct StateStore {
    base_dir: PathBuf,
}

impl StateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn workflow_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn state_path(&self, name: &str) -> PathBuf {
        self.workflow_dir(name).join(STATE_FILE_NAME)
    }

    fn plan_path(&self, name: &str) -> PathBuf {
        self.workflow_dir(name).join(PLAN_FILE_NAME)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state_path(name).is_file()
    }

    /// Persist `workflow` atomically: write to a temp file in the same
    /// directory, then rename over the real path.
    pub fn save(&self, workflow: &Workflow) -> Result<()> {
        validate_name(&workflow.name)?;
        let dir = self.workflow_dir(&workflow.name);
        create_dir_0755(&dir)?;

        let json = serde_json::to_vec_pretty(workflow).context("serializing workflow state")?;
        atomic_write(&self.state_path(&workflow.name), &json)
    }

    /// Load a workflow by name.
    ///
    /// A malformed `state.json` is surfaced as `CorruptState` and never
    /// auto-repaired, per spec §4.1.
    pub fn load(&self, name: &str) -> Result<Workflow, AppError> {
        validate_name(name)?;
        let path = self.state_path(name);
        let bytes = fs::read(&path).map_err(|_| AppError::WorkflowNotFound(name.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::CorruptState(format!("{}: {e}", path.display())))
    }

    /// Persist the planning phase's structured output as a sibling artifact.
    pub fn save_plan(&self, name: &str, plan: &Plan) -> Result<()> {
        validate_name(name)?;
        let dir = self.workflow_dir(name);
        create_dir_0755(&dir)?;
        let json = serde_json::to_vec_pretty(plan).context("serializing plan")?;
        atomic_write(&self.plan_path(name), &json)
    }

    pub fn load_plan(&self, name: &str) -> Result<Plan, AppError> {
        validate_name(name)?;
        let path = self.plan_path(name);
        let bytes = fs::read(&path)
            .map_err(|_| AppError::MissingPrerequisite {
                phase: "confirmation".to_string(),
                reason: format!("no plan.json for workflow '{name}'"),
            })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::ExternalPlanInvalid(format!("{}: {e}", path.display())))
    }

    pub fn has_plan(&self, name: &str) -> bool {
        self.plan_path(name).is_file()
    }

    /// One summary per workflow directory. Unreadable entries are skipped
    /// (the caller is expected to log a warning), per spec §4.1's `list()`.
    pub fn list(&self) -> Result<Vec<WorkflowSummary>> {
        if !self.base_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.base_dir).context("reading base directory")? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match self.load(&name) {
                Ok(wf) => out.push(WorkflowSummary {
                    name: wf.name,
                    workflow_type: wf.workflow_type,
                    current_phase: wf.current_phase,
                    updated_at: wf.updated_at,
                }),
                Err(e) => {
                    tracing::warn!(workflow = %name, error = %e, "skipping unreadable workflow");
                }
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Remove a workflow's directory entirely.
    pub fn delete(&self, name: &str) -> Result<(), AppError> {
        validate_name(name)?;
        let dir = self.workflow_dir(name);
        if !dir.is_dir() {
            return Err(AppError::WorkflowNotFound(name.to_string()));
        }
        fs::remove_dir_all(&dir)
            .map_err(|e| AppError::CorruptState(format!("failed to remove {}: {e}", dir.display())))
    }

    /// Remove only workflows whose `current_phase` is `Completed`.
    pub fn clean(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for summary in self.list()? {
            if summary.current_phase == Phase::Completed {
                self.delete(&summary.name).ok();
                removed.push(summary.name);
            }
        }
        Ok(removed)
    }
}

fn create_dir_0755(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("setting permissions on {}", dir.display()))?;
    }
    Ok(())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, bytes).with_context(|| format!("writing {}", tmp_path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o644))
            .with_context(|| format!("setting permissions on {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;
    Ok(())
}

/// True if a phase's status is not yet `Completed`; used by callers to
/// sanity-check the §3 invariant `phases[current_phase].status != completed
/// unless current_phase == completed`.
pub fn phase_not_completed(status: PhaseStatus) -> bool {
    status != PhaseStatus::Completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wfctl_core::WorkflowType;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let wf = Workflow::new("w1".into(), WorkflowType::Feature, "desc".into());
        store.save(&wf).unwrap();

        let loaded = store.load("w1").unwrap();
        assert_eq!(loaded.name, "w1");
        assert_eq!(loaded.current_phase, Phase::Planning);
    }

    #[test]
    fn save_is_atomic_no_tmp_file_left_behind() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let wf = Workflow::new("w1".into(), WorkflowType::Feature, "desc".into());
        store.save(&wf).unwrap();
        assert!(!store.workflow_dir("w1").join("state.json.tmp").exists());
        assert!(store.workflow_dir("w1").join("state.json").exists());
    }

    #[test]
    fn load_missing_workflow_errors() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let err = store.load("nope").unwrap_err();
        assert!(matches!(err, AppError::WorkflowNotFound(_)));
    }

    #[test]
    fn load_corrupt_state_is_surfaced_not_repaired() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let wf_dir = store.workflow_dir("broken");
        fs::create_dir_all(&wf_dir).unwrap();
        fs::write(wf_dir.join("state.json"), b"{not json").unwrap();

        let err = store.load("broken").unwrap_err();
        assert!(matches!(err, AppError::CorruptState(_)));
    }

    #[test]
    fn validate_name_rejects_path_traversal() {
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("normal-name").is_ok());
    }

    #[test]
    fn list_skips_unreadable_and_sorts_by_name() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save(&Workflow::new("b".into(), WorkflowType::Fix, "x".into()))
            .unwrap();
        store
            .save(&Workflow::new("a".into(), WorkflowType::Feature, "x".into()))
            .unwrap();
        fs::create_dir_all(dir.path().join("broken")).unwrap();
        fs::write(dir.path().join("broken").join("state.json"), b"not json").unwrap();

        let names: Vec<_> = store.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn delete_removes_directory() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save(&Workflow::new("gone".into(), WorkflowType::Feature, "x".into()))
            .unwrap();
        store.delete("gone").unwrap();
        assert!(!store.workflow_dir("gone").exists());
    }

    #[test]
    fn clean_only_removes_completed_workflows() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut done = Workflow::new("done".into(), WorkflowType::Feature, "x".into());
        done.current_phase = Phase::Completed;
        store.save(&done).unwrap();
        store
            .save(&Workflow::new(
                "active".into(),
                WorkflowType::Feature,
                "x".into(),
            ))
            .unwrap();

        let removed = store.clean().unwrap();
        assert_eq!(removed, vec!["done".to_string()]);
        assert!(store.exists("active"));
        assert!(!store.exists("done"));
    }

    #[test]
    fn plan_save_and_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let plan = Plan {
            summary: "do the thing".into(),
            context_type: "feature".into(),
            architecture: Default::default(),
            phases: vec![],
            work_streams: vec![],
            risks: vec![],
            complexity: "medium".into(),
            estimated_total_lines: 100,
            estimated_total_files: 3,
        };
        store.save_plan("w1", &plan).unwrap();
        assert!(store.has_plan("w1"));
        let loaded = store.load_plan("w1").unwrap();
        assert_eq!(loaded.summary, "do the thing");
    }

    #[test]
    fn load_plan_missing_reports_prerequisite() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let err = store.load_plan("none").unwrap_err();
        assert!(matches!(err, AppError::MissingPrerequisite { .. }));
    }
}
