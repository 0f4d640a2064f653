//! Target store with run-scoped listing cache.
//!
//! Wraps a [`SecretStoreClient`] with the `target_store` circuit breaker,
//! retry, a TTL cache for listings, and upsert semantics: `create` on an
//! existing path degrades to `update` and `update` on a missing path
//! degrades to `create`. Every successful write invalidates the cached
//! listing for that target.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use super::client::{SecretRecord, SecretStoreClient};
use crate::breaker::{retry, CircuitBreaker, RetryPolicy};
use crate::context::{Clock, RequestContext};
use crate::diff::{DiffEntry, DiffKind};
use crate::errors::{Result, VaultSyncError};
use crate::merge::SecretTree;
use crate::observability::metrics;
use crate::source::path;

#[derive(Debug, Clone)]
struct CachedListing {
    records: Vec<SecretRecord>,
    inserted_at: Instant,
}

/// Run-scoped TTL cache for target listings, keyed by target name.
///
/// Shared across all [`TargetStore`] handles of one run; lookups take the
/// read lock, refresh and invalidation take the write lock.
#[derive(Debug)]
pub struct ListingCache {
    inner: RwLock<HashMap<String, CachedListing>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ListingCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { inner: RwLock::new(HashMap::new()), ttl, clock }
    }

    /// Default TTL for target listings (30 minutes)
    pub fn with_default_ttl(clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::from_secs(30 * 60), clock)
    }

    pub async fn get(&self, target: &str) -> Option<Vec<SecretRecord>> {
        let cache = self.inner.read().await;
        let entry = cache.get(target)?;
        if self.clock.now().saturating_duration_since(entry.inserted_at) < self.ttl {
            debug!(target = %target, "Listing cache hit");
            Some(entry.records.clone())
        } else {
            debug!(target = %target, "Listing cache entry expired");
            None
        }
    }

    pub async fn insert(&self, target: &str, records: Vec<SecretRecord>) {
        let mut cache = self.inner.write().await;
        cache.insert(
            target.to_string(),
            CachedListing { records, inserted_at: self.clock.now() },
        );
    }

    pub async fn invalidate(&self, target: &str) {
        let mut cache = self.inner.write().await;
        if cache.remove(target).is_some() {
            debug!(target = %target, "Invalidated cached listing after write");
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// One target's view of its secret store
pub struct TargetStore {
    name: String,
    client: Arc<dyn SecretStoreClient>,
    cache: Arc<ListingCache>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl TargetStore {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn SecretStoreClient>,
        cache: Arc<ListingCache>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        Self { name: name.into(), client, cache, breaker, retry }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// List records, serving from the run-scoped cache when fresh
    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<SecretRecord>> {
        if let Some(cached) = self.cache.get(&self.name).await {
            return Ok(cached);
        }

        let started = Instant::now();
        let records = retry::execute(ctx, &self.retry, &self.breaker, "target_store.list", || {
            self.client.list(ctx)
        })
        .await?;
        metrics::record_store_operation(&self.name, "list", true, started.elapsed());

        self.cache.insert(&self.name, records.clone()).await;
        Ok(records)
    }

    /// Fetch the current value of one record
    pub async fn get(&self, ctx: &RequestContext, record_path: &str) -> Result<SecretTree> {
        let validated = path::validate_path(record_path)?;
        retry::execute(ctx, &self.retry, &self.breaker, "target_store.get", || {
            self.client.get(ctx, &validated)
        })
        .await
    }

    /// Create a record, degrading to update if it already exists.
    /// Returns the post-image version.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        record_path: &str,
        value: &SecretTree,
    ) -> Result<String> {
        let validated = path::validate_path(record_path)?;
        let started = Instant::now();

        let result = retry::execute(ctx, &self.retry, &self.breaker, "target_store.create", || {
            self.client.create(ctx, &validated, value)
        })
        .await;

        let version = match result {
            Err(VaultSyncError::AlreadyExists { .. }) => {
                debug!(target = %self.name, path = %validated, "Create degraded to update");
                retry::execute(ctx, &self.retry, &self.breaker, "target_store.update", || {
                    self.client.update(ctx, &validated, value)
                })
                .await?
            }
            other => other?,
        };

        metrics::record_store_operation(&self.name, "create", true, started.elapsed());
        self.cache.invalidate(&self.name).await;
        Ok(version)
    }

    /// Update a record, degrading to create if it is missing.
    /// Returns the post-image version.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        record_path: &str,
        value: &SecretTree,
    ) -> Result<String> {
        let validated = path::validate_path(record_path)?;
        let started = Instant::now();

        let result = retry::execute(ctx, &self.retry, &self.breaker, "target_store.update", || {
            self.client.update(ctx, &validated, value)
        })
        .await;

        let version = match result {
            Err(VaultSyncError::NotFound { .. }) => {
                debug!(target = %self.name, path = %validated, "Update degraded to create");
                retry::execute(ctx, &self.retry, &self.breaker, "target_store.create", || {
                    self.client.create(ctx, &validated, value)
                })
                .await?
            }
            other => other?,
        };

        metrics::record_store_operation(&self.name, "update", true, started.elapsed());
        self.cache.invalidate(&self.name).await;
        Ok(version)
    }

    /// Delete a record
    pub async fn delete(&self, ctx: &RequestContext, record_path: &str) -> Result<()> {
        let validated = path::validate_path(record_path)?;
        let started = Instant::now();

        retry::execute(ctx, &self.retry, &self.breaker, "target_store.delete", || {
            self.client.delete(ctx, &validated)
        })
        .await?;

        metrics::record_store_operation(&self.name, "delete", true, started.elapsed());
        self.cache.invalidate(&self.name).await;
        Ok(())
    }

    /// Apply one diff entry, returning the post-image version for writes
    pub async fn apply(&self, ctx: &RequestContext, entry: &DiffEntry) -> Result<Option<String>> {
        match entry.kind {
            DiffKind::Added => {
                let value = entry.after.as_ref().ok_or_else(|| {
                    VaultSyncError::internal("Added diff entry without an after value")
                })?;
                Ok(Some(self.create(ctx, &entry.path, value).await?))
            }
            DiffKind::Modified => {
                let value = entry.after.as_ref().ok_or_else(|| {
                    VaultSyncError::internal("Modified diff entry without an after value")
                })?;
                Ok(Some(self.update(ctx, &entry.path, value).await?))
            }
            DiffKind::Deleted => {
                self.delete(ctx, &entry.path).await?;
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for TargetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetStore")
            .field("name", &self.name)
            .field("cache_ttl", &self.cache.ttl())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::context::{ManualClock, SystemClock};
    use crate::store::memory::MemorySecretStoreClient;

    fn tree(json: serde_json::Value) -> SecretTree {
        SecretTree::from(json)
    }

    fn make_store(client: Arc<MemorySecretStoreClient>) -> TargetStore {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        TargetStore::new(
            "prod",
            client,
            Arc::new(ListingCache::with_default_ttl(clock.clone())),
            Arc::new(CircuitBreaker::new("target_store", BreakerConfig::default(), clock)),
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_list_is_cached() {
        let client = Arc::new(MemorySecretStoreClient::new());
        client.seed("app/db", tree(serde_json::json!({"a": 1})), HashMap::new());
        let store = make_store(client.clone());
        let ctx = RequestContext::new();

        store.list(&ctx).await.unwrap();
        store.list(&ctx).await.unwrap();
        assert_eq!(client.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_write_invalidates_cache() {
        let client = Arc::new(MemorySecretStoreClient::new());
        let store = make_store(client.clone());
        let ctx = RequestContext::new();

        assert!(store.list(&ctx).await.unwrap().is_empty());
        store.create(&ctx, "app/db", &tree(serde_json::json!({"a": 1}))).await.unwrap();

        let records = store.list(&ctx).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "app/db");
        assert_eq!(client.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_expires_with_ttl() {
        let client = Arc::new(MemorySecretStoreClient::new());
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let store = TargetStore::new(
            "prod",
            client.clone(),
            Arc::new(ListingCache::new(Duration::from_secs(60), clock.clone())),
            Arc::new(CircuitBreaker::new(
                "target_store",
                BreakerConfig::default(),
                Arc::new(SystemClock),
            )),
            RetryPolicy::default(),
        );
        let ctx = RequestContext::new();

        store.list(&ctx).await.unwrap();
        manual.advance(Duration::from_secs(61));
        store.list(&ctx).await.unwrap();
        assert_eq!(client.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_create_degrades_to_update() {
        let client = Arc::new(MemorySecretStoreClient::new());
        client.seed("app/db", tree(serde_json::json!({"a": 1})), HashMap::new());
        let store = make_store(client.clone());
        let ctx = RequestContext::new();

        let version =
            store.create(&ctx, "app/db", &tree(serde_json::json!({"a": 2}))).await.unwrap();
        assert_eq!(version, "2");
        assert_eq!(client.value_of("app/db"), Some(tree(serde_json::json!({"a": 2}))));
    }

    #[tokio::test]
    async fn test_update_degrades_to_create() {
        let client = Arc::new(MemorySecretStoreClient::new());
        let store = make_store(client.clone());
        let ctx = RequestContext::new();

        let version =
            store.update(&ctx, "app/new", &tree(serde_json::json!({"a": 1}))).await.unwrap();
        assert_eq!(version, "1");
        assert_eq!(client.value_of("app/new"), Some(tree(serde_json::json!({"a": 1}))));
    }

    #[tokio::test]
    async fn test_operations_validate_paths() {
        let client = Arc::new(MemorySecretStoreClient::new());
        let store = make_store(client);
        let ctx = RequestContext::new();

        for bad in ["a//b", "a/../b", ""] {
            assert!(matches!(
                store.get(&ctx, bad).await.unwrap_err(),
                VaultSyncError::InvalidPath { .. }
            ));
            assert!(matches!(
                store.create(&ctx, bad, &tree(serde_json::json!(1))).await.unwrap_err(),
                VaultSyncError::InvalidPath { .. }
            ));
            assert!(matches!(
                store.delete(&ctx, bad).await.unwrap_err(),
                VaultSyncError::InvalidPath { .. }
            ));
        }
    }
}
