//! The two-phase merge/sync pipeline.
//!
//! The [`planner`] orders targets topologically by their imports; the
//! [`executor`] drives the merge phase (read and fold all sources) and the
//! sync phase (resolve, diff, and apply each target) with bounded fan-out
//! and per-target error isolation.

pub mod executor;
pub mod planner;

use std::time::Duration;

use serde::Serialize;

use crate::diff::DiffSummary;

pub use executor::{PipelineBuilder, PipelineExecutor, RunOptions};
pub use planner::{plan, Plan};

/// One per-entry apply failure, recorded without aborting the target
#[derive(Debug, Clone, Serialize)]
pub struct EntryFailure {
    pub path: String,
    pub operation: String,
    pub error: String,
}

/// Per-target result collected into the run report
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub summary: DiffSummary,
    /// Entries applied successfully (always 0 in dry-run)
    pub applied: usize,
    pub failures: Vec<EntryFailure>,
    /// Target-level error that prevented or interrupted the sync
    pub error: Option<String>,
    pub dry_run: bool,
    /// Rendered diff when diff output was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered_diff: Option<String>,
}

impl TargetReport {
    pub fn failed(target: impl Into<String>, error: impl std::fmt::Display, dry_run: bool) -> Self {
        Self {
            target: target.into(),
            summary: DiffSummary::default(),
            applied: 0,
            failures: Vec::new(),
            error: Some(error.to_string()),
            dry_run,
            rendered_diff: None,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.error.is_some() || !self.failures.is_empty()
    }
}

/// Exit classification for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// No target reported any error and nothing was mutated
    Ok,
    /// At least one non-dry-run mutation succeeded and no target erred
    Changed,
    /// Some targets erred; others completed
    PartialFailure,
    /// All targets erred
    Failed,
}

impl RunOutcome {
    /// Process exit code; plan-level failures (cycles, invalid config)
    /// exit 2 before a report exists
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Ok | RunOutcome::Changed => 0,
            RunOutcome::PartialFailure => 3,
            RunOutcome::Failed => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Ok => "ok",
            RunOutcome::Changed => "changed",
            RunOutcome::PartialFailure => "partial_failure",
            RunOutcome::Failed => "failed",
        }
    }
}

/// Final report of one pipeline run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub request_id: String,
    pub outcome: RunOutcome,
    /// Paths in the merge-phase output
    pub merged_paths: usize,
    /// Accounts found by discovery, when enabled
    pub discovered_accounts: Option<usize>,
    /// OU subtrees discovery had to skip (possible permission gaps)
    pub discovery_skipped_subtrees: usize,
    /// Whether the run was cut short by cancellation
    pub cancelled: bool,
    pub targets: Vec<TargetReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Ok.exit_code(), 0);
        assert_eq!(RunOutcome::Changed.exit_code(), 0);
        assert_eq!(RunOutcome::PartialFailure.exit_code(), 3);
        assert_eq!(RunOutcome::Failed.exit_code(), 4);
    }

    #[test]
    fn test_target_report_error_detection() {
        let clean = TargetReport {
            target: "prod".to_string(),
            summary: DiffSummary::default(),
            applied: 3,
            failures: Vec::new(),
            error: None,
            dry_run: false,
            rendered_diff: None,
        };
        assert!(!clean.has_errors());

        let mut with_entry_failure = clean.clone();
        with_entry_failure.failures.push(EntryFailure {
            path: "app/db".to_string(),
            operation: "update".to_string(),
            error: "transient".to_string(),
        });
        assert!(with_entry_failure.has_errors());

        assert!(TargetReport::failed("prod", "boom", false).has_errors());
    }
}
