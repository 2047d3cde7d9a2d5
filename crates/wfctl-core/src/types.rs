//! Shared data model: `Workflow`, `Phase`, `PhaseState`, `Plan`, and the
//! policy-side `ToolInput`/`RuleResult` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const STATE_SCHEMA_VERSION: &str = "1.0";

/// What kind of change the workflow is making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Feature,
    Fix,
}

impl std::str::FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feature" => Ok(Self::Feature),
            "fix" => Ok(Self::Fix),
            other => Err(other.to_string()),
        }
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Feature => write!(f, "feature"),
            Self::Fix => write!(f, "fix"),
        }
    }
}

/// The fixed linear phase order, plus the terminal `Failed` state that sits
/// outside the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Confirmation,
    Implementation,
    CiWait,
    Refactoring,
    PrSplit,
    Completed,
    Failed,
}

impl Phase {
    /// Linear position for phases that participate in the normal order.
    /// `Failed` is terminal and not part of the order (`None`).
    pub fn order(&self) -> Option<u8> {
        match self {
            Phase::Planning => Some(0),
            Phase::Confirmation => Some(1),
            Phase::Implementation => Some(2),
            Phase::CiWait => Some(3),
            Phase::Refactoring => Some(4),
            Phase::PrSplit => Some(5),
            Phase::Completed => Some(6),
            Phase::Failed => None,
        }
    }

    /// All phases in ascending order, `Failed` excluded.
    pub fn ordered() -> &'static [Phase] {
        &[
            Phase::Planning,
            Phase::Confirmation,
            Phase::Implementation,
            Phase::CiWait,
            Phase::Refactoring,
            Phase::PrSplit,
            Phase::Completed,
        ]
    }

    /// Whether `self` comes strictly before `other` in the normal order.
    /// `Failed` is never before or after anything (always `false`).
    pub fn precedes(&self, other: &Phase) -> bool {
        match (self.order(), other.order()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Whether the assistant is invoked for this phase (some phases are
    /// pure bookkeeping, per spec §4.1's phase table).
    pub fn invokes_assistant(&self) -> bool {
        matches!(
            self,
            Phase::Planning | Phase::Implementation | Phase::Refactoring | Phase::PrSplit
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Planning => "planning",
            Phase::Confirmation => "confirmation",
            Phase::Implementation => "implementation",
            Phase::CiWait => "ci_wait",
            Phase::Refactoring => "refactoring",
            Phase::PrSplit => "pr_split",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "confirmation" => Ok(Self::Confirmation),
            "implementation" => Ok(Self::Implementation),
            "ci_wait" => Ok(Self::CiWait),
            "refactoring" => Ok(Self::Refactoring),
            "pr_split" => Ok(Self::PrSplit),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(other.to_string()),
        }
    }
}

/// Status of a single phase's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Per-phase execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self {
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            attempts: 0,
            last_error: None,
            artifact_ref: None,
        }
    }
}

/// Kind of a recorded phase transition, per spec §3/§8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Normal,
    Skip,
    BackwardSkip,
    Retry,
}

/// One entry in `phase_history`.
///
/// `id` is an opaque, lexically-sortable identifier for the transition itself
/// (distinct from `at`, which is the timestamp used for ordering); it exists
/// so external tooling can reference one specific transition during replay or
/// debugging without re-deriving an index into the vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    #[serde(default = "new_transition_id")]
    pub id: String,
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
    pub kind: TransitionKind,
}

fn new_transition_id() -> String {
    ulid::Ulid::new().to_string()
}

/// The long-lived unit of work persisted by `wfctl-state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<std::path::PathBuf>,
    pub current_phase: Phase,
    pub phases: BTreeMap<Phase, PhaseState>,
    #[serde(default)]
    pub phase_history: Vec<PhaseTransition>,
    #[serde(default)]
    pub skipped_phases: BTreeSet<Phase>,
    #[serde(default)]
    pub external_plan_used: bool,
    /// Carries feedback/context into the next attempt of a requeued phase:
    /// confirmation-rejection feedback into the next `planning` prompt, or a
    /// CI failure summary into the next `implementation`/`refactoring`
    /// prompt. Persisted so a requeue survives a process restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_context: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,

    /// Unknown fields from a future schema version are preserved verbatim
    /// across a load/save round-trip rather than silently dropped.
    #[serde(flatten, default)]
    pub unknown_fields: serde_json::Map<String, serde_json::Value>,
}

fn default_version() -> String {
    STATE_SCHEMA_VERSION.to_string()
}

impl Workflow {
    pub fn new(name: String, workflow_type: WorkflowType, description: String) -> Self {
        let now = Utc::now();
        let mut phases = BTreeMap::new();
        for phase in Phase::ordered() {
            phases.insert(*phase, PhaseState::default());
        }
        Self {
            name,
            workflow_type,
            description,
            created_at: now,
            updated_at: now,
            worktree_path: None,
            current_phase: Phase::Planning,
            phases,
            phase_history: Vec::new(),
            skipped_phases: BTreeSet::new(),
            external_plan_used: false,
            retry_context: None,
            version: default_version(),
            unknown_fields: serde_json::Map::new(),
        }
    }

    pub fn phase_state(&self, phase: Phase) -> PhaseState {
        self.phases.get(&phase).cloned().unwrap_or_default()
    }

    pub fn record_transition(&mut self, from: Phase, to: Phase, kind: TransitionKind) {
        self.phase_history.push(PhaseTransition {
            id: new_transition_id(),
            from,
            to,
            at: Utc::now(),
            kind,
        });
        self.updated_at = Utc::now();
    }
}

/// Architecture summary embedded in a `Plan`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Architecture {
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub components: Vec<String>,
}

/// One work-breakdown entry in a `Plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPhase {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Structured assistant output for the planning phase (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub summary: String,
    #[serde(default)]
    pub context_type: String,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default)]
    pub phases: Vec<PlanPhase>,
    #[serde(default)]
    pub work_streams: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub complexity: String,
    #[serde(default)]
    pub estimated_total_lines: u64,
    #[serde(default)]
    pub estimated_total_files: u64,
}

/// `{tool_name, tool_input}` read from stdin by the policy binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ToolInput {
    /// Parse and validate: `tool_name` must be present and non-empty.
    pub fn parse(raw: &str) -> Result<Self, crate::error::AppError> {
        let input: ToolInput = serde_json::from_str(raw)
            .map_err(|e| crate::error::AppError::AssistantParseError(e.to_string()))?;
        if input.tool_name.trim().is_empty() {
            return Err(crate::error::AppError::AssistantParseError(
                "tool_name is required and must be non-empty".to_string(),
            ));
        }
        Ok(input)
    }

    /// Look up a string-valued argument in `tool_input`.
    ///
    /// Returns `(value, found)`: `found` is `true` only when the key exists
    /// and holds a JSON string, matching spec §6's "string arg lookup
    /// returns (value, found)" contract.
    pub fn get_string_arg(&self, key: &str) -> (Option<&str>, bool) {
        match self.tool_input.as_ref().and_then(|m| m.get(key)) {
            Some(serde_json::Value::String(s)) => (Some(s.as_str()), true),
            Some(_) => (None, true),
            None => (None, false),
        }
    }
}

/// Result of evaluating the rule list against a `ToolInput`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RuleResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            rule_name: None,
            message: None,
        }
    }

    pub fn deny(rule_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            rule_name: Some(rule_name.into()),
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_matches_spec() {
        assert_eq!(Phase::Planning.order(), Some(0));
        assert_eq!(Phase::Confirmation.order(), Some(1));
        assert_eq!(Phase::Implementation.order(), Some(2));
        assert_eq!(Phase::CiWait.order(), Some(3));
        assert_eq!(Phase::Refactoring.order(), Some(4));
        assert_eq!(Phase::PrSplit.order(), Some(5));
        assert_eq!(Phase::Completed.order(), Some(6));
        assert_eq!(Phase::Failed.order(), None);
    }

    #[test]
    fn precedes_is_strict_and_excludes_failed() {
        assert!(Phase::Planning.precedes(&Phase::Confirmation));
        assert!(!Phase::Confirmation.precedes(&Phase::Planning));
        assert!(!Phase::Planning.precedes(&Phase::Planning));
        assert!(!Phase::Planning.precedes(&Phase::Failed));
        assert!(!Phase::Failed.precedes(&Phase::Planning));
    }

    #[test]
    fn workflow_new_seeds_all_phases_pending() {
        let wf = Workflow::new(
            "demo".into(),
            WorkflowType::Feature,
            "add hello".into(),
        );
        assert_eq!(wf.current_phase, Phase::Planning);
        for phase in Phase::ordered() {
            assert_eq!(wf.phase_state(*phase).status, PhaseStatus::Pending);
        }
        assert_eq!(wf.version, STATE_SCHEMA_VERSION);
    }

    #[test]
    fn record_transition_appends_and_bumps_updated_at() {
        let mut wf = Workflow::new("demo".into(), WorkflowType::Fix, "fix bug".into());
        let before = wf.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        wf.record_transition(Phase::Planning, Phase::Confirmation, TransitionKind::Normal);
        assert_eq!(wf.phase_history.len(), 1);
        assert!(wf.updated_at >= before);
        assert_eq!(wf.phase_history[0].kind, TransitionKind::Normal);
    }

    #[test]
    fn workflow_serde_roundtrip_preserves_unknown_fields() {
        let wf = Workflow::new("demo".into(), WorkflowType::Feature, "x".into());
        let mut value = serde_json::to_value(&wf).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("future_field".into(), serde_json::json!("kept"));
        let reloaded: Workflow = serde_json::from_value(value).unwrap();
        assert_eq!(
            reloaded.unknown_fields.get("future_field"),
            Some(&serde_json::json!("kept"))
        );
    }

    #[test]
    fn tool_input_requires_nonempty_tool_name() {
        let err = ToolInput::parse(r#"{"tool_name":""}"#).unwrap_err();
        assert!(err.to_string().contains("tool_name"));

        let err = ToolInput::parse(r#"{}"#).unwrap_err();
        assert!(matches!(err, crate::error::AppError::AssistantParseError(_)));
    }

    #[test]
    fn tool_input_allows_missing_tool_input() {
        let input = ToolInput::parse(r#"{"tool_name":"Bash"}"#).unwrap();
        assert_eq!(input.tool_name, "Bash");
        assert!(input.tool_input.is_none());
    }

    #[test]
    fn get_string_arg_distinguishes_missing_from_non_string() {
        let input = ToolInput::parse(
            r#"{"tool_name":"Bash","tool_input":{"command":"ls","count":3}}"#,
        )
        .unwrap();
        assert_eq!(input.get_string_arg("command"), (Some("ls"), true));
        assert_eq!(input.get_string_arg("count"), (None, true));
        assert_eq!(input.get_string_arg("missing"), (None, false));
    }

    #[test]
    fn workflow_type_from_str() {
        assert_eq!("feature".parse::<WorkflowType>(), Ok(WorkflowType::Feature));
        assert_eq!("fix".parse::<WorkflowType>(), Ok(WorkflowType::Fix));
        assert!("bogus".parse::<WorkflowType>().is_err());
    }
}
