use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "workflow-cli", about = "Drives the planning/implementation/CI workflow FSM")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project config file providing defaults for the flags below (TOML).
    #[arg(long, global = true, default_value = ".claude/workflow.toml")]
    pub config: PathBuf,

    /// Root directory workflow state is persisted under.
    #[arg(long, global = true, default_value = ".claude/workflow")]
    pub base_dir: PathBuf,

    /// Split the final PR into smaller child PRs once refactoring completes.
    #[arg(long, global = true)]
    pub split_pr: bool,

    /// Path (or bare name, resolved via PATH) to the assistant CLI binary.
    #[arg(long, global = true, default_value = "claude")]
    pub claude_path: String,

    /// Forward `--dangerously-skip-permissions` to the assistant binary.
    #[arg(long, global = true)]
    pub dangerously_skip_permissions: bool,

    /// Planning phase timeout, in seconds.
    #[arg(long, global = true, default_value_t = 3600)]
    pub timeout_planning: u64,

    /// Implementation phase timeout, in seconds.
    #[arg(long, global = true, default_value_t = 6 * 3600)]
    pub timeout_implementation: u64,

    /// Refactoring phase timeout, in seconds.
    #[arg(long, global = true, default_value_t = 6 * 3600)]
    pub timeout_refactoring: u64,

    /// PR-split phase timeout, in seconds.
    #[arg(long, global = true, default_value_t = 3600)]
    pub timeout_pr_split: u64,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new workflow and drive it forward.
    Start {
        name: String,
        description: String,
        #[arg(long = "type")]
        workflow_type: String,
        /// Jump straight to a forward phase instead of starting at planning.
        #[arg(long)]
        skip_to: Option<String>,
        /// JSON file satisfying the Plan schema, used when skipping to confirmation.
        #[arg(long)]
        external_plan: Option<PathBuf>,
    },
    /// List every workflow under `--base-dir`.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print one workflow's persisted state.
    Status {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Re-enter a persisted workflow's current phase and drive it forward.
    Resume {
        name: String,
        #[arg(long)]
        skip_to: Option<String>,
        /// Required to move `current_phase` backward.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        external_plan: Option<PathBuf>,
    },
    /// Remove a workflow's persisted state.
    Delete {
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// Remove every workflow whose `current_phase` is `completed`.
    Clean {
        #[arg(long)]
        force: bool,
    },
    /// Print the stderr tail of the most recent failed phase attempt, if any.
    Logs { name: String },
}
