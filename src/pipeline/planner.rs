//! Target planning: topological ordering over the import graph.
//!
//! Kahn's algorithm over the edge `t -> u` for every `u` in `t.imports`.
//! The output is grouped into dependency levels: every target's imports
//! live in strictly earlier levels, so the executor can fan targets out
//! within a level and barrier between levels without an importer ever
//! reading a bundle its dependency has not finished writing. Ties inside
//! a level are broken by target name ascending for determinism.

use std::collections::{HashMap, HashSet};

use crate::config::{TargetConfig, BASE_MERGED};
use crate::errors::{Result, VaultSyncError};

/// Topologically ordered targets, grouped into dependency levels
#[derive(Debug, Clone)]
pub struct Plan {
    levels: Vec<Vec<TargetConfig>>,
}

impl Plan {
    pub fn levels(&self) -> &[Vec<TargetConfig>] {
        &self.levels
    }

    /// Total order: levels concatenated, each sorted by name
    pub fn ordered(&self) -> impl Iterator<Item = &TargetConfig> {
        self.levels.iter().flatten()
    }

    pub fn ordered_names(&self) -> Vec<&str> {
        self.ordered().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Build the plan, failing with `CircularTargets` on a cycle
pub fn plan(targets: &[TargetConfig]) -> Result<Plan> {
    let mut index_by_name: HashMap<&str, usize> = HashMap::new();
    for (index, target) in targets.iter().enumerate() {
        if target.name == BASE_MERGED {
            return Err(VaultSyncError::validation(format!(
                "'{}' is a reserved import name and cannot be used as a target name",
                BASE_MERGED
            )));
        }
        if index_by_name.insert(&target.name, index).is_some() {
            return Err(VaultSyncError::validation(format!(
                "Duplicate target name '{}'",
                target.name
            )));
        }
    }

    // in_degree counts distinct in-plan imports; importers[i] lists the
    // targets waiting on target i.
    let mut in_degree: Vec<usize> = vec![0; targets.len()];
    let mut importers: Vec<Vec<usize>> = vec![Vec::new(); targets.len()];
    for (index, target) in targets.iter().enumerate() {
        let mut seen: HashSet<&str> = HashSet::new();
        for import in &target.imports {
            if import == BASE_MERGED || !seen.insert(import) {
                continue;
            }
            let Some(&import_index) = index_by_name.get(import.as_str()) else {
                return Err(VaultSyncError::validation(format!(
                    "Target '{}' imports unknown target '{}'",
                    target.name, import
                )));
            };
            in_degree[index] += 1;
            importers[import_index].push(index);
        }
    }

    let mut levels: Vec<Vec<TargetConfig>> = Vec::new();
    let mut placed = 0usize;
    let mut ready: Vec<usize> =
        (0..targets.len()).filter(|&i| in_degree[i] == 0).collect();

    while !ready.is_empty() {
        ready.sort_by(|&a, &b| targets[a].name.cmp(&targets[b].name));
        let mut next: Vec<usize> = Vec::new();
        for &index in &ready {
            for &importer in &importers[index] {
                in_degree[importer] -= 1;
                if in_degree[importer] == 0 {
                    next.push(importer);
                }
            }
        }
        placed += ready.len();
        levels.push(ready.iter().map(|&i| targets[i].clone()).collect());
        ready = next;
    }

    if placed != targets.len() {
        let mut remaining: Vec<String> = targets
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, t)| t.name.clone())
            .collect();
        remaining.sort();
        return Err(VaultSyncError::CircularTargets { remaining });
    }

    Ok(Plan { levels })
}
