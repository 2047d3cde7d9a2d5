//! Typed wrapper over the `gh` CLI plus `CIWaiter`, the PR-check polling
//! loop consumed by the orchestrator's `ci_wait`/`refactoring` phases.

mod adapter;
mod ci_waiter;

pub use adapter::{CheckRun, GhAdapter};
pub use ci_waiter::{CIProgress, CIResult, CIWaitOptions, CIWaiter, DEFAULT_MAX_INTERVAL, DEFAULT_POLL_INTERVAL};
