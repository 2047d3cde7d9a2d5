//! Shared types and error taxonomy for the workflow orchestrator and the
//! pre-tool-use policy engine.

pub mod error;
pub mod types;

pub use error::AppError;
pub use types::{
    Architecture, Phase, PhaseState, PhaseStatus, PhaseTransition, Plan, PlanPhase, RuleResult,
    ToolInput, TransitionKind, Workflow, WorkflowType, STATE_SCHEMA_VERSION,
};
