//! The confirmation-loop hook (spec §4.1/§9): a caller-supplied function
//! `Plan -> (approve, feedback)` so tests inject a deterministic function and
//! the CLI binds a terminal reader. No event loop is required.

use std::io::{self, Write};
use wfctl_core::Plan;

/// Trait-object-friendly alias for the confirm callback.
pub type ConfirmFn<'a> = dyn FnMut(&Plan) -> anyhow::Result<(bool, String)> + 'a;

/// Default terminal-backed confirmation: reads a `y/n` line, then (only on
/// rejection) a line of feedback to carry into the next planning attempt.
pub fn stdin_confirm(plan: &Plan) -> anyhow::Result<(bool, String)> {
    println!("Plan: {}", plan.summary);
    print!("Approve? [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    let approved = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");

    if approved {
        return Ok((true, String::new()));
    }

    print!("Feedback for the next attempt: ");
    io::stdout().flush()?;
    let mut feedback = String::new();
    io::stdin().read_line(&mut feedback)?;
    Ok((false, feedback.trim().to_string()))
}
