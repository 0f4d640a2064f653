//! Structural diff between two path-keyed bundles.
//!
//! The diff is an outer join on the key set: paths only in `after` are
//! Added, only in `before` are Deleted, present in both but deep-unequal
//! are Modified, and deep-equal paths are suppressed. Entries are sorted
//! lexicographically by path.

pub mod render;

use serde::Serialize;

use crate::merge::{MergedBundle, SecretTree};

pub use render::{render, DiffFormat, RenderOptions};

/// Classification of one diff entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiffKind {
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for DiffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffKind::Added => write!(f, "Added"),
            DiffKind::Modified => write!(f, "Modified"),
            DiffKind::Deleted => write!(f, "Deleted"),
        }
    }
}

/// One Added/Modified/Deleted classification with before/after images
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub path: String,
    pub kind: DiffKind,
    pub before: Option<SecretTree>,
    pub after: Option<SecretTree>,
    pub before_version: Option<String>,
    pub after_version: Option<String>,
}

/// Counts per classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl DiffSummary {
    pub fn from_entries(entries: &[DiffEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            match entry.kind {
                DiffKind::Added => summary.added += 1,
                DiffKind::Modified => summary.modified += 1,
                DiffKind::Deleted => summary.deleted += 1,
            }
        }
        summary
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.modified == 0 && self.deleted == 0
    }

    pub fn total(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}

/// Compute the structural diff between two bundles
pub fn compute_diff(before: &MergedBundle, after: &MergedBundle) -> Vec<DiffEntry> {
    let mut paths: Vec<&String> = before.keys().chain(after.keys()).collect();
    paths.sort();
    paths.dedup();

    let mut entries = Vec::new();
    for path in paths {
        match (before.get(path), after.get(path)) {
            (None, Some(new)) => entries.push(DiffEntry {
                path: path.clone(),
                kind: DiffKind::Added,
                before: None,
                after: Some(new.clone()),
                before_version: None,
                after_version: None,
            }),
            (Some(old), None) => entries.push(DiffEntry {
                path: path.clone(),
                kind: DiffKind::Deleted,
                before: Some(old.clone()),
                after: None,
                before_version: None,
                after_version: None,
            }),
            (Some(old), Some(new)) if old != new => entries.push(DiffEntry {
                path: path.clone(),
                kind: DiffKind::Modified,
                before: Some(old.clone()),
                after: Some(new.clone()),
                before_version: None,
                after_version: None,
            }),
            // Deep-equal or impossible (path came from one of the maps).
            _ => {}
        }
    }
    entries
}
