//! Forward/backward skip semantics (spec §4.1).
//!
//! Kept as pure functions over `&mut Workflow` so the FSM bookkeeping is
//! testable without spawning any subprocess.

use wfctl_core::{AppError, Phase, PhaseState, PhaseStatus, TransitionKind, Workflow};

/// Prerequisite check for a forward skip, independent of how the caller
/// determined `has_plan`/`confirmation_completed`/`implementation_completed`.
pub fn check_forward_prerequisites(
    target: Phase,
    has_plan: bool,
    confirmation_completed: bool,
    implementation_completed: bool,
) -> Result<(), AppError> {
    match target {
        Phase::Confirmation if !has_plan => Err(AppError::MissingPrerequisite {
            phase: target.to_string(),
            reason: "no plan (persisted or supplied via --external-plan)".to_string(),
        }),
        Phase::Implementation if !confirmation_completed => Err(AppError::MissingPrerequisite {
            phase: target.to_string(),
            reason: "confirmation has not completed".to_string(),
        }),
        Phase::Refactoring if !implementation_completed => Err(AppError::MissingPrerequisite {
            phase: target.to_string(),
            reason: "implementation has not completed".to_string(),
        }),
        Phase::Completed | Phase::Failed => Err(AppError::InvalidSkipTarget(target.to_string())),
        _ => Ok(()),
    }
}

/// Move `current_phase` forward to `target`, marking every phase strictly
/// before it `Skipped` (unless already `Completed`) and recording exactly one
/// `Skip` transition.
pub fn apply_forward_skip(workflow: &mut Workflow, target: Phase) {
    let from = workflow.current_phase;
    for phase in Phase::ordered() {
        if phase.precedes(&target) {
            let entry = workflow.phases.entry(*phase).or_default();
            if entry.status != PhaseStatus::Completed {
                entry.status = PhaseStatus::Skipped;
            }
            workflow.skipped_phases.insert(*phase);
        }
    }
    workflow.current_phase = target;
    workflow.record_transition(from, target, TransitionKind::Skip);
}

/// Move `current_phase` backward to `target`, resetting every phase at or
/// after it to `pending` and recording exactly one `BackwardSkip` transition.
/// Callers must gate this behind `ResumeOpts::force_backward`.
pub fn apply_backward_skip(workflow: &mut Workflow, target: Phase) {
    let from = workflow.current_phase;
    let target_order = target.order().unwrap_or(u8::MAX);
    for phase in Phase::ordered() {
        if phase.order().is_some_and(|o| o >= target_order) {
            workflow.phases.insert(*phase, PhaseState::default());
            workflow.skipped_phases.remove(phase);
        }
    }
    workflow.current_phase = target;
    workflow.record_transition(from, target, TransitionKind::BackwardSkip);
}
