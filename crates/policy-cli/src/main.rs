//! The pre-tool-use hook binary (spec §6): reads one `ToolInput` JSON object
//! from stdin, evaluates it against `wfctl_hooks::default_engine`, and exits
//! 0 (allow) or 2 (deny) with a one-line message on stderr.

use std::io::Read;

use clap::{Parser, Subcommand};
use wfctl_core::ToolInput;

#[derive(Parser)]
#[command(name = "policy-cli", about = "Pre-tool-use branch-protection policy hook")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a `{tool_name, tool_input}` JSON object from stdin and decide
    /// allow/deny.
    PreToolUse {
        /// On allow, also print which rules were consulted (not just silent
        /// exit 0).
        #[arg(long)]
        explain: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let Commands::PreToolUse { explain } = cli.command;

    let mut raw = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut raw) {
        eprintln!("policy-cli: failed to read stdin: {e}");
        std::process::exit(2);
    }

    let input = match ToolInput::parse(&raw) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("policy-cli: invalid tool input: {e}");
            std::process::exit(2);
        }
    };

    let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
    let engine = wfctl_hooks::default_engine(cwd);
    let result = engine.evaluate(&input);

    if result.allowed {
        if explain {
            let names: Vec<&str> = engine.rules().iter().map(|r| r.name()).collect();
            eprintln!("policy-cli: allowed (rules consulted: {})", names.join(", "));
        }
        std::process::exit(0);
    }

    let rule_name = result.rule_name.as_deref().unwrap_or("unknown");
    let message = result.message.as_deref().unwrap_or("denied");
    eprintln!("Blocked by rule {rule_name}: {message}");
    std::process::exit(2);
}
