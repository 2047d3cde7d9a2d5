//! Pre-tool-use policy engine (spec §4.5/§4.6): a pure command lexer plus
//! five branch-protection rules (R1–R5), wired through an ordered
//! [`engine::PolicyEngine`]. Consumed by the `policy-cli` binary, which owns
//! stdin/stdout framing and exit codes.

pub mod engine;
pub mod lexer;
pub mod lookup;
pub mod rules;

pub use engine::{FailPolicy, PolicyEngine};
pub use lookup::{CurrentBranchLookup, PrBaseBranchLookup, ShellCurrentBranch, ShellPrBaseBranch};
pub use rules::{BranchProtectionRule, GitPushRule, NoVerifyRule, PrMergeRule, Rule, RulesetRule};

/// Build the standard R1–R5 engine against a given working directory,
/// wiring the `git`/`gh` lookups `GitPushRule`/`PrMergeRule` need.
pub fn default_engine(cwd: std::path::PathBuf) -> PolicyEngine {
    let branch_lookup = Box::new(ShellCurrentBranch { cwd: cwd.clone() });
    let pr_base_lookup = Box::new(ShellPrBaseBranch { cwd });

    PolicyEngine::new(vec![
        Box::new(NoVerifyRule),
        Box::new(GitPushRule { branch_lookup }),
        Box::new(BranchProtectionRule),
        Box::new(RulesetRule),
        Box::new(PrMergeRule { base_branch_lookup: pr_base_lookup }),
    ])
}
