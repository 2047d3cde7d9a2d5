//! Phase prompt text and the JSON schemas passed to the assistant as
//! `--output-schema` (spec §4.1's phase table, §3's `Plan`).

use wfctl_core::{Plan, WorkflowType};

pub fn planning_prompt(description: &str, workflow_type: WorkflowType, retry_context: Option<&str>) -> String {
    let mut prompt = format!(
        "You are planning a {workflow_type} change. Produce a structured plan for: {description}"
    );
    if let Some(feedback) = retry_context {
        if !feedback.is_empty() {
            prompt.push_str(&format!(
                "\n\nThe previous plan was rejected with this feedback, address it: {feedback}"
            ));
        }
    }
    prompt
}

pub fn planning_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["summary"],
        "properties": {
            "summary": {"type": "string"},
            "context_type": {"type": "string"},
            "architecture": {
                "type": "object",
                "properties": {
                    "overview": {"type": "string"},
                    "components": {"type": "array", "items": {"type": "string"}}
                }
            },
            "phases": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "description": {"type": "string"}
                    }
                }
            },
            "work_streams": {"type": "array", "items": {"type": "string"}},
            "risks": {"type": "array", "items": {"type": "string"}},
            "complexity": {"type": "string"},
            "estimated_total_lines": {"type": "integer"},
            "estimated_total_files": {"type": "integer"}
        }
    })
}

pub fn implementation_prompt(plan: &Plan, branch: &str, retry_context: Option<&str>) -> String {
    let mut prompt = format!(
        "Implement the following plan on branch '{branch}':\n\n{}\n\nWhen done, commit your changes.",
        plan.summary
    );
    if let Some(ci_output) = retry_context {
        if !ci_output.is_empty() {
            prompt.push_str(&format!(
                "\n\nThe previous attempt failed CI with the following output, fix it:\n{ci_output}"
            ));
        }
    }
    prompt
}

pub fn refactoring_prompt(plan: &Plan, pr_number: &str, retry_context: Option<&str>) -> String {
    let mut prompt = format!(
        "Review PR #{pr_number} (implementing: {}) for refactoring opportunities and apply them.",
        plan.summary
    );
    if let Some(ci_output) = retry_context {
        if !ci_output.is_empty() {
            prompt.push_str(&format!(
                "\n\nThe previous attempt failed CI with the following output, fix it:\n{ci_output}"
            ));
        }
    }
    prompt
}

/// One child PR produced by the `pr_split` phase's structured output.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ChildPr {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub branch: Option<String>,
}

/// Structured assistant output expected from the `pr_split` phase.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ChildPrPlan {
    pub children: Vec<ChildPr>,
}

pub fn pr_split_prompt(pr_number: &str) -> String {
    format!(
        "PR #{pr_number} has grown too large for a single review. Split its changes into \
         a set of smaller, independently reviewable child PRs and describe each one."
    )
}

pub fn pr_split_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["children"],
        "properties": {
            "children": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["title", "body"],
                    "properties": {
                        "title": {"type": "string"},
                        "body": {"type": "string"},
                        "branch": {"type": "string"}
                    }
                }
            }
        }
    })
}
