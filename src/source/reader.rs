//! Breadth-first source listing with cycle detection and bounds.
//!
//! A node is a directory iff its listed name ends in `/`. A directory is
//! marked visited when it is dequeued and walked; re-encountering it (a
//! cycle or a diamond in the listing graph) yields a skip, not an error.
//! Because a directory can be discovered by several parents before it is
//! walked, the pending queue may hold duplicates; once it grows past
//! `queue_compaction_threshold` it is rewritten in place, dropping entries
//! whose directory has been walked in the meantime. Listing stops without
//! error once `max_secrets` leaves have accumulated.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::client::{SourceClient, SourceEntry};
use super::path;
use crate::breaker::{retry, CircuitBreaker, RetryPolicy};
use crate::config::SourceConfig;
use crate::context::RequestContext;
use crate::errors::Result;
use crate::merge::SecretTree;
use crate::observability::metrics;

/// Reader over one source mount
#[derive(Clone)]
pub struct SourceReader {
    client: Arc<dyn SourceClient>,
    config: SourceConfig,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

/// Drop pending entries whose directory has already been walked,
/// preserving the relative order of the rest. O(n).
fn compact_queue(queue: &mut VecDeque<String>, visited: &HashSet<String>) -> usize {
    let before = queue.len();
    queue.retain(|pending| !visited.contains(path::dir_key(pending)));
    before - queue.len()
}

impl SourceReader {
    pub fn new(
        client: Arc<dyn SourceClient>,
        config: SourceConfig,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        Self { client, config, breaker, retry }
    }

    /// The mount this reader walks
    pub fn mount(&self) -> &str {
        &self.config.mount
    }

    /// Resolve a listed entry against the directory it was listed under.
    ///
    /// Names containing interior slashes are already full paths (sources
    /// that alias or link directories report them this way); bare names
    /// are joined onto the parent.
    fn resolve_entry(dir: &str, entry: &SourceEntry) -> String {
        if path::dir_key(&entry.name).contains('/') {
            entry.name.trim_start_matches('/').to_string()
        } else {
            path::join(dir, &entry.name)
        }
    }

    /// Enumerate leaf paths under the mount, breadth-first
    pub async fn list_leaves(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        let started = Instant::now();
        let mount = path::validate_path(&self.config.mount)?;
        let max_secrets = self.config.max_secrets;
        let compaction_threshold = self.config.queue_compaction_threshold;

        let mut queue: VecDeque<String> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut leaves: Vec<String> = Vec::new();

        queue.push_back(mount);

        'walk: while let Some(dir) = queue.pop_front() {
            ctx.check("source.list")?;
            if !visited.insert(path::dir_key(&dir).to_string()) {
                debug!(
                    mount = %self.config.mount,
                    path = %dir,
                    "Skipping already visited directory"
                );
                continue;
            }

            let entries = retry::execute(ctx, &self.retry, &self.breaker, "source.list", || {
                self.client.list(ctx, &dir)
            })
            .await?;

            for entry in entries {
                let full = Self::resolve_entry(&dir, &entry);
                if entry.is_dir || path::is_dir(&entry.name) {
                    if visited.contains(path::dir_key(&full)) {
                        debug!(
                            mount = %self.config.mount,
                            path = %full,
                            "Skipping already visited directory"
                        );
                    } else {
                        queue.push_back(full);
                    }
                } else {
                    let leaf = path::validate_path(&full)?;
                    leaves.push(leaf);
                    if leaves.len() >= max_secrets {
                        warn!(
                            mount = %self.config.mount,
                            max_secrets = max_secrets,
                            "Source listing reached max_secrets; returning partial set"
                        );
                        break 'walk;
                    }
                }
            }

            // Memory bound on the pending queue.
            if queue.len() > compaction_threshold {
                let dropped = compact_queue(&mut queue, &visited);
                if dropped > 0 {
                    debug!(
                        mount = %self.config.mount,
                        dropped = dropped,
                        remaining = queue.len(),
                        "Compacted source listing queue"
                    );
                }
            }
        }

        metrics::record_source_list(&self.config.mount, leaves.len(), started.elapsed());
        Ok(leaves)
    }

    /// Read the latest version of one leaf
    pub async fn read(
        &self,
        ctx: &RequestContext,
        leaf: &str,
    ) -> Result<(SecretTree, Option<String>)> {
        let validated = path::validate_path(leaf)?;
        let started = Instant::now();
        let result = retry::execute(ctx, &self.retry, &self.breaker, "source.read", || {
            self.client.read(ctx, &validated)
        })
        .await;
        metrics::record_source_read(&self.config.mount, result.is_ok(), started.elapsed());
        result
    }
}

impl std::fmt::Debug for SourceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceReader")
            .field("mount", &self.config.mount)
            .field("max_secrets", &self.config.max_secrets)
            .finish()
    }
}
