//! Blob merge store: persisted per-target bundles for inheritance.
//!
//! Each target's merged output is written one object per path under
//! `<prefix>/<target>/<path>.json` in canonical JSON (sorted mapping keys,
//! UTF-8, no trailing newline), so downstream importers re-read exactly
//! what the upstream target materialized and objects stay
//! content-hash-comparable.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::breaker::{retry, CircuitBreaker, RetryPolicy};
use crate::context::RequestContext;
use crate::errors::{Result, VaultSyncError};
use crate::merge::{MergedBundle, SecretTree};
use crate::observability::metrics;
use crate::source::path;

/// Client for an external object store
#[async_trait]
pub trait BlobClient: Send + Sync {
    async fn put(&self, ctx: &RequestContext, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<Vec<u8>>;
    /// List keys under a prefix, exhausting pagination
    async fn list(&self, ctx: &RequestContext, prefix: &str) -> Result<Vec<String>>;
}

/// Per-target merged-output persistence over a [`BlobClient`]
#[derive(Clone)]
pub struct BlobMergeStore {
    client: Arc<dyn BlobClient>,
    prefix: String,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl BlobMergeStore {
    pub fn new(
        client: Arc<dyn BlobClient>,
        prefix: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            prefix: prefix.into().trim_matches('/').to_string(),
            breaker,
            retry,
        }
    }

    fn key_for(&self, target: &str, record_path: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}/{}.json", target, record_path)
        } else {
            format!("{}/{}/{}.json", self.prefix, target, record_path)
        }
    }

    fn target_prefix(&self, target: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}/", target)
        } else {
            format!("{}/{}/", self.prefix, target)
        }
    }

    /// Write one merged value; overwrites any previous object
    pub async fn write(
        &self,
        ctx: &RequestContext,
        target: &str,
        record_path: &str,
        value: &SecretTree,
    ) -> Result<()> {
        let validated = path::validate_path(record_path)?;
        let key = self.key_for(target, &validated);
        let bytes = value.to_canonical_json()?.into_bytes();

        retry::execute(ctx, &self.retry, &self.breaker, "blob_store.put", || {
            self.client.put(ctx, &key, bytes.clone())
        })
        .await?;
        metrics::record_blob_operation("put", true);
        Ok(())
    }

    /// Read one merged value; `NotFound` if absent
    pub async fn read(
        &self,
        ctx: &RequestContext,
        target: &str,
        record_path: &str,
    ) -> Result<SecretTree> {
        let validated = path::validate_path(record_path)?;
        let key = self.key_for(target, &validated);

        let bytes = retry::execute(ctx, &self.retry, &self.breaker, "blob_store.get", || {
            self.client.get(ctx, &key)
        })
        .await?;
        metrics::record_blob_operation("get", true);
        SecretTree::from_json_slice(&bytes)
    }

    /// List the logical paths persisted for a target
    pub async fn list(&self, ctx: &RequestContext, target: &str) -> Result<Vec<String>> {
        let prefix = self.target_prefix(target);

        let keys = retry::execute(ctx, &self.retry, &self.breaker, "blob_store.list", || {
            self.client.list(ctx, &prefix)
        })
        .await?;
        metrics::record_blob_operation("list", true);

        Ok(keys
            .iter()
            .filter_map(|key| {
                key.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect())
    }

    /// Persist a whole bundle, one object per path
    pub async fn write_bundle(
        &self,
        ctx: &RequestContext,
        target: &str,
        bundle: &MergedBundle,
    ) -> Result<()> {
        let started = Instant::now();
        for (record_path, value) in bundle {
            ctx.check("blob_store.put")?;
            self.write(ctx, target, record_path, value).await?;
        }
        debug!(
            target = %target,
            paths = bundle.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Persisted merged bundle"
        );
        Ok(())
    }

    /// Read back a whole bundle via list + read
    pub async fn read_bundle(&self, ctx: &RequestContext, target: &str) -> Result<MergedBundle> {
        let mut bundle = MergedBundle::new();
        for record_path in self.list(ctx, target).await? {
            ctx.check("blob_store.get")?;
            let value = self.read(ctx, target, &record_path).await?;
            bundle.insert(record_path, value);
        }
        Ok(bundle)
    }

}

impl std::fmt::Debug for BlobMergeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobMergeStore").field("prefix", &self.prefix).finish()
    }
}

/// Convenience error used when imports require a merge store that is
/// disabled in configuration
pub fn merge_store_disabled(target: &str, import: &str) -> VaultSyncError {
    VaultSyncError::validation(format!(
        "target '{}' imports '{}' but the merge store is disabled",
        target, import
    ))
}
