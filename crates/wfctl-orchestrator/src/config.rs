//! Immutable orchestrator configuration, threaded through `Orchestrator::new`
//! rather than read from global/mutable CLI flag state (spec §9's design
//! note on "global mutable CLI flag state").

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Default per-phase retry budget (spec §4.1): a phase is retried this many
/// times before the workflow transitions to `Failed`.
pub const DEFAULT_RETRY_BUDGET: u32 = 2;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub base_dir: PathBuf,
    pub split_pr: bool,
    pub claude_path: String,
    pub skip_permissions: bool,
    pub timeout_planning: Duration,
    pub timeout_implementation: Duration,
    pub timeout_refactoring: Duration,
    pub timeout_pr_split: Duration,
    pub retry_budget: u32,
    /// Overridable for tests pointing at a fixture script, mirroring
    /// `GitAdapter::with_binary`/`GhAdapter::with_binary`.
    pub git_bin: String,
    pub gh_bin: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(".claude/workflow"),
            split_pr: false,
            claude_path: "claude".to_string(),
            skip_permissions: false,
            timeout_planning: Duration::from_secs(3600),
            timeout_implementation: Duration::from_secs(6 * 3600),
            timeout_refactoring: Duration::from_secs(6 * 3600),
            timeout_pr_split: Duration::from_secs(3600),
            retry_budget: DEFAULT_RETRY_BUDGET,
            git_bin: "git".to_string(),
            gh_bin: "gh".to_string(),
        }
    }
}

/// On-disk project defaults for the orchestrator's persistent flags
/// (`workflow-cli`'s own config file, distinct from the `Workflow`/`Plan`
/// state `wfctl-state` persists).
///
/// Every field is optional: a key absent from the file falls through to the
/// CLI flag's own default. Precedence is CLI flag > file > hardcoded default,
/// resolved by [`OrchestratorConfig::merge_file`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub split_pr: Option<bool>,
    #[serde(default)]
    pub claude_path: Option<String>,
    #[serde(default)]
    pub dangerously_skip_permissions: Option<bool>,
    #[serde(default)]
    pub timeout_planning_secs: Option<u64>,
    #[serde(default)]
    pub timeout_implementation_secs: Option<u64>,
    #[serde(default)]
    pub timeout_refactoring_secs: Option<u64>,
    #[serde(default)]
    pub timeout_pr_split_secs: Option<u64>,
    #[serde(default)]
    pub retry_budget: Option<u32>,
    #[serde(default)]
    pub git_bin: Option<String>,
    #[serde(default)]
    pub gh_bin: Option<String>,
}

impl FileConfig {
    /// Read and parse a `workflow-cli` TOML config file. Returns the empty
    /// (all-`None`) config when `path` does not exist — the file is optional,
    /// not a hard requirement.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))
    }
}

impl OrchestratorConfig {
    /// Apply file-config values for every field the caller didn't already
    /// override from the CLI (`cli_set_*` flags mark which fields a user
    /// explicitly passed; unset fields are eligible for a file override).
    pub fn merge_file(mut self, file: &FileConfig, explicit: &ExplicitFlags) -> Self {
        if !explicit.base_dir {
            if let Some(v) = &file.base_dir {
                self.base_dir = v.clone();
            }
        }
        if !explicit.split_pr {
            if let Some(v) = file.split_pr {
                self.split_pr = v;
            }
        }
        if !explicit.claude_path {
            if let Some(v) = &file.claude_path {
                self.claude_path = v.clone();
            }
        }
        if !explicit.skip_permissions {
            if let Some(v) = file.dangerously_skip_permissions {
                self.skip_permissions = v;
            }
        }
        if !explicit.timeout_planning {
            if let Some(v) = file.timeout_planning_secs {
                self.timeout_planning = Duration::from_secs(v);
            }
        }
        if !explicit.timeout_implementation {
            if let Some(v) = file.timeout_implementation_secs {
                self.timeout_implementation = Duration::from_secs(v);
            }
        }
        if !explicit.timeout_refactoring {
            if let Some(v) = file.timeout_refactoring_secs {
                self.timeout_refactoring = Duration::from_secs(v);
            }
        }
        if !explicit.timeout_pr_split {
            if let Some(v) = file.timeout_pr_split_secs {
                self.timeout_pr_split = Duration::from_secs(v);
            }
        }
        if let Some(v) = file.retry_budget {
            self.retry_budget = v;
        }
        if let Some(v) = &file.git_bin {
            self.git_bin = v.clone();
        }
        if let Some(v) = &file.gh_bin {
            self.gh_bin = v.clone();
        }
        self
    }
}

/// Which `OrchestratorConfig` fields the CLI invocation explicitly set,
/// i.e. which ones must NOT be overridden by a file config value.
/// `clap`'s `ArgMatches::value_source` drives this at the call site; see
/// `workflow-cli`'s `main.rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitFlags {
    pub base_dir: bool,
    pub split_pr: bool,
    pub claude_path: bool,
    pub skip_permissions: bool,
    pub timeout_planning: bool,
    pub timeout_implementation: bool,
    pub timeout_refactoring: bool,
    pub timeout_pr_split: bool,
}
