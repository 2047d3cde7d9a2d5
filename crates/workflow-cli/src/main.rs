use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};

mod cli;

use cli::{Cli, Commands};
use wfctl_core::{Phase, WorkflowType};
use wfctl_orchestrator::{
    stdin_confirm, ExplicitFlags, FileConfig, Orchestrator, OrchestratorConfig, ResumeOpts, StartOpts,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Cli::command().get_matches();
    let explicit = ExplicitFlags {
        base_dir: is_explicit(&matches, "base_dir"),
        split_pr: is_explicit(&matches, "split_pr"),
        claude_path: is_explicit(&matches, "claude_path"),
        skip_permissions: is_explicit(&matches, "dangerously_skip_permissions"),
        timeout_planning: is_explicit(&matches, "timeout_planning"),
        timeout_implementation: is_explicit(&matches, "timeout_implementation"),
        timeout_refactoring: is_explicit(&matches, "timeout_refactoring"),
        timeout_pr_split: is_explicit(&matches, "timeout_pr_split"),
    };
    let cli = Cli::from_arg_matches(&matches).context("parsing CLI arguments")?;

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .try_init()
        .ok();

    let exit_code = run(cli, explicit).await?;
    std::process::exit(exit_code);
}

/// A flag counts as "explicit" only when the user actually passed it on the
/// command line — not when clap fell back to its own `default_value`. Only
/// an explicit CLI flag is allowed to override a value from `--config`.
fn is_explicit(matches: &clap::ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(clap::parser::ValueSource::CommandLine)
    )
}

async fn run(cli: Cli, explicit: ExplicitFlags) -> Result<i32> {
    let file_config = FileConfig::load(&cli.config)
        .with_context(|| format!("loading config file {}", cli.config.display()))?;

    let config = OrchestratorConfig {
        base_dir: cli.base_dir.clone(),
        split_pr: cli.split_pr,
        claude_path: cli.claude_path.clone(),
        skip_permissions: cli.dangerously_skip_permissions,
        timeout_planning: Duration::from_secs(cli.timeout_planning),
        timeout_implementation: Duration::from_secs(cli.timeout_implementation),
        timeout_refactoring: Duration::from_secs(cli.timeout_refactoring),
        timeout_pr_split: Duration::from_secs(cli.timeout_pr_split),
        ..OrchestratorConfig::default()
    }
    .merge_file(&file_config, &explicit);

    let repo_dir = std::env::current_dir().context("determining current directory")?;
    let orchestrator = Orchestrator::new(config, repo_dir);

    match cli.command {
        Commands::Start {
            name,
            description,
            workflow_type,
            skip_to,
            external_plan,
        } => {
            let workflow_type = WorkflowType::from_str(&workflow_type)
                .map_err(|t| anyhow::anyhow!("Invalid workflow type '{t}': expected 'feature' or 'fix'"))?;
            let skip_to = parse_skip_target(skip_to.as_deref())?;
            let opts = StartOpts {
                skip_to,
                external_plan,
            };
            let mut confirm = stdin_confirm;
            let workflow = orchestrator
                .start(&name, &description, workflow_type, opts, &mut confirm)
                .await?;
            print_workflow_summary(&workflow);
            Ok(if workflow.current_phase == Phase::Failed { 1 } else { 0 })
        }
        Commands::Resume {
            name,
            skip_to,
            force,
            external_plan,
        } => {
            let skip_to = parse_skip_target(skip_to.as_deref())?;
            let opts = ResumeOpts {
                skip_to,
                force_backward: force,
                external_plan,
            };
            let mut confirm = stdin_confirm;
            let workflow = orchestrator.resume(&name, opts, &mut confirm).await?;
            print_workflow_summary(&workflow);
            Ok(if workflow.current_phase == Phase::Failed { 1 } else { 0 })
        }
        Commands::Status { name, json } => {
            let workflow = orchestrator.status(&name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&workflow)?);
            } else {
                print_workflow_summary(&workflow);
            }
            Ok(0)
        }
        Commands::List { json } => {
            let workflows = orchestrator.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&workflows)?);
            } else if workflows.is_empty() {
                println!("No workflows under {}", cli.base_dir.display());
            } else {
                for summary in &workflows {
                    println!(
                        "{:<24} {:<14} {:<12} updated {}",
                        summary.name,
                        summary.workflow_type,
                        summary.current_phase,
                        summary.updated_at.to_rfc3339()
                    );
                }
            }
            Ok(0)
        }
        Commands::Delete { name, force } => {
            if !force {
                anyhow::bail!("refusing to delete '{name}' without --force");
            }
            orchestrator.delete(&name)?;
            println!("Deleted workflow '{name}'");
            Ok(0)
        }
        Commands::Clean { force } => {
            if !force {
                anyhow::bail!("refusing to clean without --force");
            }
            let removed = orchestrator.clean()?;
            if removed.is_empty() {
                println!("No completed workflows to remove");
            } else {
                for name in &removed {
                    println!("Removed completed workflow '{name}'");
                }
            }
            Ok(0)
        }
        Commands::Logs { name } => print_logs(&orchestrator, &name),
    }
}

fn parse_skip_target(skip_to: Option<&str>) -> Result<Option<Phase>> {
    match skip_to {
        None => Ok(None),
        Some(raw) => Phase::from_str(raw)
            .map(Some)
            .map_err(|p| anyhow::anyhow!("Invalid --skip-to target '{p}'")),
    }
}

fn print_workflow_summary(workflow: &wfctl_core::Workflow) {
    println!("workflow: {}", workflow.name);
    println!("  type:          {}", workflow.workflow_type);
    println!("  current_phase: {}", workflow.current_phase);
    for phase in Phase::ordered() {
        if *phase == Phase::Completed {
            continue;
        }
        let state = workflow.phase_state(*phase);
        println!("  {:<14} {:?} (attempts={})", phase, state.status, state.attempts);
    }
}

fn print_logs(orchestrator: &Orchestrator, name: &str) -> Result<i32> {
    let workflow = orchestrator.status(name)?;
    let mut found = false;
    for phase in Phase::ordered() {
        let state = workflow.phase_state(*phase);
        if let Some(err) = &state.last_error {
            found = true;
            println!("[{phase}] attempts={} last_error:\n{err}\n", state.attempts);
        }
    }
    if !found {
        println!("No recorded phase failures for '{name}'");
    }
    Ok(0)
}
