//! Per-call options for `start`/`resume` (spec §4.1).

use std::path::PathBuf;
use wfctl_core::Phase;

#[derive(Debug, Clone, Default)]
pub struct StartOpts {
    /// Jump straight to a forward phase instead of beginning at `planning`.
    pub skip_to: Option<Phase>,
    /// Path to a JSON file validated against the `Plan` schema, used to
    /// satisfy the `confirmation` skip's prerequisite when no plan has been
    /// persisted yet.
    pub external_plan: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeOpts {
    pub skip_to: Option<Phase>,
    /// Required to move `current_phase` backward; resets every phase at or
    /// after the target to `pending`.
    pub force_backward: bool,
    pub external_plan: Option<PathBuf>,
}
