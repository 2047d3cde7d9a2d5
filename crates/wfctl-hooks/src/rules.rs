//! R1–R5 (spec §4.6): the five concrete branch-protection rules.
//!
//! Modeled as a sealed capability — `{name, description, evaluate}` — per
//! spec §9's design note, not a trait-object inheritance hierarchy: the
//! engine just holds an ordered `Vec<Box<dyn Rule>>`.

use regex::Regex;
use std::sync::OnceLock;
use wfctl_core::{AppError, RuleResult, ToolInput};

use crate::lexer::{self, QuoteMode, Refspec};
use crate::lookup::{CurrentBranchLookup, PrBaseBranchLookup};

/// A single policy rule. Rules only look at `tool_name == "Bash"`'s
/// `command` string argument; every other tool passes through as allow.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn evaluate(&self, input: &ToolInput) -> Result<RuleResult, AppError>;
}

fn bash_command(input: &ToolInput) -> Option<&str> {
    if input.tool_name != "Bash" {
        return None;
    }
    let (value, found) = input.get_string_arg("command");
    if !found {
        return None;
    }
    value
}

/// R1 — denies any sub-command whose tokens contain the exact token
/// `--no-verify`.
pub struct NoVerifyRule;

impl Rule for NoVerifyRule {
    fn name(&self) -> &'static str {
        "no-verify"
    }

    fn description(&self) -> &'static str {
        "Denies commands that pass --no-verify, which bypasses git hooks."
    }

    fn evaluate(&self, input: &ToolInput) -> Result<RuleResult, AppError> {
        let Some(command) = bash_command(input) else {
            return Ok(RuleResult::allow());
        };
        for sub in lexer::split_shell_commands(command) {
            let tokens = lexer::tokenize(&sub, QuoteMode::Keep);
            if lexer::has_exact_flag(&tokens, "--no-verify") {
                return Ok(RuleResult::deny(
                    self.name(),
                    "Command contains --no-verify flag which bypasses git hooks",
                ));
            }
        }
        Ok(RuleResult::allow())
    }
}

/// R2 — `git push` variants that would touch a protected branch.
pub struct GitPushRule {
    pub branch_lookup: Box<dyn CurrentBranchLookup>,
}

impl Rule for GitPushRule {
    fn name(&self) -> &'static str {
        "git-push"
    }

    fn description(&self) -> &'static str {
        "Denies pushes (direct, force, delete, --all/--mirror) to main/master."
    }

    fn evaluate(&self, input: &ToolInput) -> Result<RuleResult, AppError> {
        let Some(command) = bash_command(input) else {
            return Ok(RuleResult::allow());
        };
        for sub in lexer::split_shell_commands(command) {
            if let Some(result) = self.evaluate_subcommand(&sub) {
                if !result.allowed {
                    return Ok(result);
                }
            }
        }
        Ok(RuleResult::allow())
    }
}

impl GitPushRule {
    fn evaluate_subcommand(&self, sub: &str) -> Option<RuleResult> {
        let tokens = lexer::tokenize(sub, QuoteMode::Keep);
        let stripped: Vec<String> = lexer::tokenize(sub, QuoteMode::Strip);
        if stripped.len() < 2 || stripped[0] != "git" || stripped[1] != "push" {
            return None;
        }

        if lexer::has_flag_unquoted(&tokens, "--all") || lexer::has_flag_unquoted(&tokens, "--mirror") {
            return Some(RuleResult::deny(
                self.name(),
                "Push --all/--mirror includes protected branches and is not allowed",
            ));
        }

        let positionals: Vec<&String> = stripped.iter().skip(2).filter(|t| !t.starts_with('-')).collect();
        let has_delete_flag = lexer::has_flag_unquoted(&tokens, "--delete") || lexer::has_flag_unquoted(&tokens, "-d");

        let refspecs: Vec<Refspec> = positionals.iter().map(|t| lexer::parse_refspec(t)).collect();

        if has_delete_flag {
            for positional in &positionals {
                if lexer::is_protected_branch(positional) {
                    return Some(RuleResult::deny(self.name(), "Deleting main/master branch is not allowed"));
                }
            }
        }

        for rs in &refspecs {
            if rs.is_delete && lexer::is_protected_branch(&rs.dst) {
                return Some(RuleResult::deny(self.name(), "Deleting main/master branch is not allowed"));
            }
        }

        for rs in &refspecs {
            if rs.force && lexer::is_protected_branch(&rs.dst) {
                return Some(RuleResult::deny(self.name(), "Force push to main/master branch is not allowed"));
            }
        }

        for rs in &refspecs {
            if !rs.is_delete && rs.src.as_deref() != Some(rs.dst.as_str()) && lexer::is_protected_branch(&rs.dst) {
                return Some(RuleResult::deny(self.name(), "Direct push to main/master branch is not allowed"));
            }
        }

        // A single positional with no `:` is a bare branch name: `git push origin main`.
        if let Some(last) = positionals.last() {
            if !last.contains(':') && lexer::is_protected_branch(last) {
                return Some(RuleResult::deny(self.name(), "Direct push to main/master branch is not allowed"));
            }
        }

        // Implicit push: `git push` or `git push origin` with no branch/refspec.
        if positionals.len() <= 1 {
            match self.branch_lookup.current_branch() {
                Ok(branch) if lexer::is_protected_branch(&branch) => {
                    return Some(RuleResult::deny(self.name(), "Direct push to main/master branch is not allowed"));
                }
                Ok(_) => return Some(RuleResult::allow()),
                Err(_) => return Some(RuleResult::allow()), // fail open, per spec §4.6/§7
            }
        }

        Some(RuleResult::allow())
    }
}

fn branches_protection_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/repos/[^/]+/[^/]+/branches/[^/]+/protection(/.*)?$").unwrap())
}

fn rulesets_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(repos/[^/]+/[^/]+|orgs/[^/]+)/rulesets(/.*)?$").unwrap())
}

fn gh_api_url(tokens: &[String]) -> Option<String> {
    let stripped: Vec<String> = tokens.iter().map(|t| unquote(t)).collect();
    let api_pos = stripped.iter().position(|t| t == "api")?;
    stripped[api_pos + 1..].iter().find(|t| !t.starts_with('-')).cloned()
}

fn unquote(token: &str) -> String {
    lexer::tokenize(token, QuoteMode::Strip).join("")
}

/// R3 — mutating calls to the branch-protection REST endpoint.
pub struct BranchProtectionRule;

impl Rule for BranchProtectionRule {
    fn name(&self) -> &'static str {
        "gh-branch-protection"
    }

    fn description(&self) -> &'static str {
        "Denies DELETE/PUT/PATCH on /repos/{owner}/{repo}/branches/{branch}/protection."
    }

    fn evaluate(&self, input: &ToolInput) -> Result<RuleResult, AppError> {
        let Some(command) = bash_command(input) else {
            return Ok(RuleResult::allow());
        };
        for sub in lexer::split_shell_commands(command) {
            let tokens = lexer::tokenize(&sub, QuoteMode::Keep);
            let stripped: Vec<String> = tokens.iter().map(|t| unquote(t)).collect();
            if stripped.first().map(String::as_str) != Some("gh") {
                continue;
            }
            let Some(url) = gh_api_url(&tokens) else { continue };
            if !branches_protection_regex().is_match(&url) {
                continue;
            }
            let method = lexer::extract_http_method(&tokens);
            if matches!(method.as_str(), "DELETE" | "PUT" | "PATCH") {
                return Ok(RuleResult::deny(
                    self.name(),
                    "Mutating branch protection via gh api is not allowed",
                ));
            }
        }
        Ok(RuleResult::allow())
    }
}

/// R4 — mutating calls to repository/org ruleset REST endpoints. `POST` is
/// explicitly allowed (creating a new ruleset is not itself a weakening).
pub struct RulesetRule;

impl Rule for RulesetRule {
    fn name(&self) -> &'static str {
        "gh-ruleset"
    }

    fn description(&self) -> &'static str {
        "Denies DELETE/PUT/PATCH on /repos/.../rulesets or /orgs/.../rulesets."
    }

    fn evaluate(&self, input: &ToolInput) -> Result<RuleResult, AppError> {
        let Some(command) = bash_command(input) else {
            return Ok(RuleResult::allow());
        };
        for sub in lexer::split_shell_commands(command) {
            let tokens = lexer::tokenize(&sub, QuoteMode::Keep);
            let stripped: Vec<String> = tokens.iter().map(|t| unquote(t)).collect();
            if stripped.first().map(String::as_str) != Some("gh") {
                continue;
            }
            let Some(url) = gh_api_url(&tokens) else { continue };
            if !rulesets_regex().is_match(&url) {
                continue;
            }
            let method = lexer::extract_http_method(&tokens);
            if matches!(method.as_str(), "DELETE" | "PUT" | "PATCH") {
                return Ok(RuleResult::deny(self.name(), "Mutating rulesets via gh api is not allowed"));
            }
        }
        Ok(RuleResult::allow())
    }
}

fn pr_merge_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/pull/(\d+)").unwrap())
}

fn pulls_merge_api_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/repos/[^/]+/[^/]+/pulls/(\d+)/merge").unwrap())
}

/// R5 — merging a PR whose base branch is protected.
pub struct PrMergeRule {
    pub base_branch_lookup: Box<dyn PrBaseBranchLookup>,
}

impl Rule for PrMergeRule {
    fn name(&self) -> &'static str {
        "pr-merge"
    }

    fn description(&self) -> &'static str {
        "Denies `gh pr merge`/`gh api ... pulls/{n}/merge` when the PR's base is main/master."
    }

    fn evaluate(&self, input: &ToolInput) -> Result<RuleResult, AppError> {
        let Some(command) = bash_command(input) else {
            return Ok(RuleResult::allow());
        };
        for sub in lexer::split_shell_commands(command) {
            if let Some(pr) = self.extract_pr_number(&sub) {
                match self.base_branch_lookup.pr_base_branch(&pr) {
                    Ok(base) if lexer::is_protected_branch(&base) => {
                        return Ok(RuleResult::deny(
                            self.name(),
                            "Merging a PR into main/master is not allowed",
                        ));
                    }
                    Ok(_) => {}
                    Err(_) => {} // fail open, per spec §4.6/§7
                }
            }
        }
        Ok(RuleResult::allow())
    }
}

impl PrMergeRule {
    fn extract_pr_number(&self, sub: &str) -> Option<String> {
        let tokens = lexer::tokenize(sub, QuoteMode::Keep);
        let stripped: Vec<String> = tokens.iter().map(|t| unquote(t)).collect();

        if stripped.len() >= 3 && stripped[0] == "gh" && stripped[1] == "pr" && stripped[2] == "merge" {
            let arg = stripped.get(3)?;
            if let Some(caps) = pr_merge_regex().captures(arg) {
                return Some(caps[1].to_string());
            }
            if arg.chars().all(|c| c.is_ascii_digit()) {
                return Some(arg.clone());
            }
            return None;
        }

        if stripped.first().map(String::as_str) == Some("gh") {
            let method = lexer::extract_http_method(&tokens);
            if method == "PUT" {
                if let Some(url) = gh_api_url(&tokens) {
                    if let Some(caps) = pulls_merge_api_regex().captures(&url) {
                        return Some(caps[1].to_string());
                    }
                }
            }
        }

        None
    }
}
