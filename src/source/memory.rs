//! In-memory source backend.
//!
//! Serves secrets from a map of leaf paths, deriving the directory tree on
//! demand. Intended for development and tests (the listing graph can also
//! be specified explicitly, which allows cyclic graphs). Failure injection
//! mirrors what a flaky network client would surface.

use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;

use super::client::{SourceClient, SourceEntry};
use crate::context::RequestContext;
use crate::errors::{Result, VaultSyncError};
use crate::merge::SecretTree;

/// In-memory implementation of [`SourceClient`]
#[derive(Debug, Default)]
pub struct MemorySourceClient {
    leaves: IndexMap<String, SecretTree>,
    /// Explicit listing graph; when set, `list` consults it instead of
    /// deriving from `leaves`. Keys are directory paths without trailing
    /// slashes.
    graph: Option<HashMap<String, Vec<SourceEntry>>>,
    failures: Mutex<HashMap<String, Vec<VaultSyncError>>>,
}

impl MemorySourceClient {
    /// Build a source from leaf path -> value pairs
    pub fn from_secrets(secrets: impl IntoIterator<Item = (String, SecretTree)>) -> Self {
        Self { leaves: secrets.into_iter().collect(), ..Default::default() }
    }

    /// Build a source with an explicit listing graph (may contain cycles)
    pub fn with_graph(
        graph: HashMap<String, Vec<SourceEntry>>,
        leaves: impl IntoIterator<Item = (String, SecretTree)>,
    ) -> Self {
        Self { leaves: leaves.into_iter().collect(), graph: Some(graph), ..Default::default() }
    }

    /// Queue an error to be returned by the next call to `operation`
    /// (`"list"` or `"read"`)
    pub fn inject_failure(&self, operation: &str, error: VaultSyncError) {
        self.failures.lock().entry(operation.to_string()).or_default().push(error);
    }

    fn take_failure(&self, operation: &str) -> Option<VaultSyncError> {
        let mut failures = self.failures.lock();
        let queue = failures.get_mut(operation)?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    fn derive_children(&self, dir: &str) -> Vec<SourceEntry> {
        let prefix = if dir.is_empty() { String::new() } else { format!("{}/", dir) };
        let mut seen_dirs: Vec<String> = Vec::new();
        let mut entries: Vec<SourceEntry> = Vec::new();

        for path in self.leaves.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else { continue };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((child_dir, _)) => {
                    if !seen_dirs.iter().any(|d| d == child_dir) {
                        seen_dirs.push(child_dir.to_string());
                        entries.push(SourceEntry::dir(child_dir));
                    }
                }
                None => entries.push(SourceEntry::leaf(rest)),
            }
        }
        entries
    }
}

#[async_trait]
impl SourceClient for MemorySourceClient {
    async fn list(&self, ctx: &RequestContext, path: &str) -> Result<Vec<SourceEntry>> {
        ctx.check("source.list")?;
        if let Some(err) = self.take_failure("list") {
            return Err(err);
        }

        let key = path.trim_end_matches('/');
        match &self.graph {
            Some(graph) => graph
                .get(key)
                .cloned()
                .ok_or_else(|| VaultSyncError::not_found(path)),
            None => Ok(self.derive_children(key)),
        }
    }

    async fn read(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<(SecretTree, Option<String>)> {
        ctx.check("source.read")?;
        if let Some(err) = self.take_failure("read") {
            return Err(err);
        }

        self.leaves
            .get(path)
            .cloned()
            .map(|value| (value, Some("1".to_string())))
            .ok_or_else(|| VaultSyncError::not_found(path))
    }
}
