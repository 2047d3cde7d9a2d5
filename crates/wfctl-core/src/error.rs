//! Error taxonomy shared by every `wfctl-*` crate.
//!
//! Mirrors the split in spec §7: `UserInput` errors are never retried and
//! surface with exit code 1; `Transient` errors are retried by the owning
//! component up to its own budget; `External`/`Protocol`/`State` errors are
//! surfaced as-is. `PolicyEvaluationError` is handled specially by the hook
//! binary: the engine fails closed (the caller must treat it as a deny).

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    // ---- UserInput ----
    #[error("Invalid workflow name '{0}': must not contain path separators or '..'")]
    InvalidName(String),

    #[error("Invalid workflow type '{0}': expected 'feature' or 'fix'")]
    InvalidWorkflowType(String),

    #[error("Cannot skip to phase '{0}'")]
    InvalidSkipTarget(String),

    #[error("Missing prerequisite for phase '{phase}': {reason}")]
    MissingPrerequisite { phase: String, reason: String },

    #[error("External plan file not found: {0}")]
    ExternalPlanNotFound(PathBuf),

    #[error("External plan file is invalid: {0}")]
    ExternalPlanInvalid(String),

    #[error("Workflow '{0}' already exists")]
    WorkflowExists(String),

    #[error("No workflow named '{0}'")]
    WorkflowNotFound(String),

    // ---- Transient ----
    #[error("Assistant invocation timed out after {0:?}")]
    AssistantTimeout(std::time::Duration),

    #[error("CI poll failed: {0}")]
    CIPollFailure(String),

    #[error("Transient git failure: {0}")]
    GitTransient(String),

    // ---- External ----
    #[error("Assistant binary unavailable: {0}")]
    AssistantUnavailable(String),

    #[error("git failed: {0}")]
    GitFailure(String),

    #[error("gh failed: {0}")]
    GhFailure(String),

    #[error("CI is unavailable: {0}")]
    CIUnavailable(String),

    // ---- Protocol ----
    #[error("Prompt is too long for the assistant binary")]
    PromptTooLong,

    #[error("Failed to parse assistant output: {0}")]
    AssistantParseError(String),

    // ---- State ----
    #[error("Workflow state is corrupt: {0}")]
    CorruptState(String),

    #[error("Workflow is locked by another process: {0}")]
    LockHeld(String),

    // ---- Policy ----
    #[error("Policy evaluation failed: {0}")]
    PolicyEvaluationError(String),
}

impl AppError {
    /// True for errors the orchestrator's retry budget should consume a retry for.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::AssistantTimeout(_) | AppError::CIPollFailure(_) | AppError::GitTransient(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_name_message() {
        let err = AppError::InvalidName("../etc".into());
        assert!(err.to_string().contains("../etc"));
    }

    #[test]
    fn missing_prerequisite_message_has_phase_and_reason() {
        let err = AppError::MissingPrerequisite {
            phase: "implementation".into(),
            reason: "confirmation not completed".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("implementation"));
        assert!(msg.contains("confirmation not completed"));
    }

    #[test]
    fn transient_classification() {
        assert!(AppError::AssistantTimeout(std::time::Duration::from_secs(1)).is_transient());
        assert!(AppError::CIPollFailure("x".into()).is_transient());
        assert!(AppError::GitTransient("x".into()).is_transient());
        assert!(!AppError::PromptTooLong.is_transient());
        assert!(!AppError::CorruptState("x".into()).is_transient());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AppError>();
    }
}
