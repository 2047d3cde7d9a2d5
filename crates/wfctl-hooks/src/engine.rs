//! `PolicyEngine` (spec §4.6): runs the ordered rule list, first-deny-wins,
//! default-allow otherwise.

use wfctl_core::{AppError, RuleResult, ToolInput};

use crate::rules::Rule;

/// What happens when a rule itself errors (not denies — errors).
///
/// Default is `Closed`, per spec §7: "the engine itself fails closed" on a
/// rule evaluation error. This is distinct from a rule's own internal-lookup
/// failure (e.g. `git rev-parse` against a non-repo): those are caught inside
/// the rule and returned as `Ok(RuleResult::allow())` — see
/// `GitPushRule`/`PrMergeRule`'s fail-open branch-lookup handling — so they
/// never reach this policy at all. Kept as a first-class, settable type
/// rather than a hardcoded behavior so a caller can opt a specific engine
/// into fail-open without forking the evaluation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailPolicy {
    Open,
    #[default]
    Closed,
}

pub struct PolicyEngine {
    rules: Vec<Box<dyn Rule>>,
    fail_policy: FailPolicy,
}

impl PolicyEngine {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules, fail_policy: FailPolicy::default() }
    }

    pub fn with_fail_policy(mut self, fail_policy: FailPolicy) -> Self {
        self.fail_policy = fail_policy;
        self
    }

    pub fn rules(&self) -> &[Box<dyn Rule>] {
        &self.rules
    }

    /// Evaluate every rule in order; the first deny wins, otherwise allow.
    /// A rule returning `Err` is treated per `fail_policy`.
    pub fn evaluate(&self, input: &ToolInput) -> RuleResult {
        for rule in &self.rules {
            match rule.evaluate(input) {
                Ok(result) if !result.allowed => return result,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(rule = rule.name(), error = %e, "rule evaluation failed");
                    match self.fail_policy {
                        FailPolicy::Closed => {
                            return RuleResult::deny(rule.name(), format!("rule evaluation failed: {e}"));
                        }
                        FailPolicy::Open => continue,
                    }
                }
            }
        }
        RuleResult::allow()
    }
}
