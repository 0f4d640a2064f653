//! In-memory secret store and blob store backends.
//!
//! Development and test implementations of [`SecretStoreClient`] and
//! [`BlobClient`]. The secret store versions records monotonically and
//! supports failure injection so breaker and retry behavior can be
//! exercised deterministically.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::blob::BlobClient;
use super::client::{SecretRecord, SecretStoreClient};
use crate::context::RequestContext;
use crate::errors::{Result, VaultSyncError};
use crate::merge::SecretTree;

#[derive(Debug, Clone)]
struct StoredSecret {
    value: SecretTree,
    version: u64,
    tags: HashMap<String, String>,
}

/// In-memory implementation of [`SecretStoreClient`]
#[derive(Debug, Default)]
pub struct MemorySecretStoreClient {
    records: Mutex<BTreeMap<String, StoredSecret>>,
    failures: Mutex<HashMap<String, Vec<VaultSyncError>>>,
    list_calls: AtomicU64,
}

impl MemorySecretStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record with tags (for discovery and filter tests)
    pub fn seed(&self, path: &str, value: SecretTree, tags: HashMap<String, String>) {
        let mut records = self.records.lock();
        records.insert(path.to_string(), StoredSecret { value, version: 1, tags });
    }

    /// Queue an error for the next call to `operation`
    /// (`"list"`, `"get"`, `"create"`, `"update"`, `"delete"`)
    pub fn inject_failure(&self, operation: &str, error: VaultSyncError) {
        self.failures.lock().entry(operation.to_string()).or_default().push(error);
    }

    /// Number of `list` calls that reached this client (cache assertions)
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Current value of a record, bypassing the client interface
    pub fn value_of(&self, path: &str) -> Option<SecretTree> {
        self.records.lock().get(path).map(|s| s.value.clone())
    }

    /// All stored paths (test assertions)
    pub fn paths(&self) -> Vec<String> {
        self.records.lock().keys().cloned().collect()
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
}

#[async_trait]
impl SecretStoreClient for MemorySecretStoreClient {
    async fn list(&self, ctx: &RequestContext) -> Result<Vec<SecretRecord>> {
        ctx.check("target_store.list")?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure("list") {
            return Err(err);
        }

        let records = self.records.lock();
        Ok(records
            .iter()
            .map(|(path, stored)| SecretRecord {
                path: path.clone(),
                version: Some(stored.version.to_string()),
                tags: stored.tags.clone(),
            })
            .collect())
    }

    async fn get(&self, ctx: &RequestContext, path: &str) -> Result<SecretTree> {
        ctx.check("target_store.get")?;
        if let Some(err) = self.take_failure("get") {
            return Err(err);
        }

        self.records
            .lock()
            .get(path)
            .map(|s| s.value.clone())
            .ok_or_else(|| VaultSyncError::not_found(path))
    }

    async fn create(
        &self,
        ctx: &RequestContext,
        path: &str,
        value: &SecretTree,
    ) -> Result<String> {
        ctx.check("target_store.create")?;
        if let Some(err) = self.take_failure("create") {
            return Err(err);
        }

        let mut records = self.records.lock();
        if records.contains_key(path) {
            return Err(VaultSyncError::already_exists(path));
        }
        records.insert(
            path.to_string(),
            StoredSecret { value: value.clone(), version: 1, tags: HashMap::new() },
        );
        Ok("1".to_string())
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        path: &str,
        value: &SecretTree,
    ) -> Result<String> {
        ctx.check("target_store.update")?;
        if let Some(err) = self.take_failure("update") {
            return Err(err);
        }

        let mut records = self.records.lock();
        match records.get_mut(path) {
            Some(stored) => {
                stored.value = value.clone();
                stored.version += 1;
                Ok(stored.version.to_string())
            }
            None => Err(VaultSyncError::not_found(path)),
        }
    }

    async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        ctx.check("target_store.delete")?;
        if let Some(err) = self.take_failure("delete") {
            return Err(err);
        }

        let mut records = self.records.lock();
        records
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| VaultSyncError::not_found(path))
    }
}

/// In-memory implementation of [`BlobClient`]
#[derive(Debug, Default)]
pub struct MemoryBlobClient {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    put_calls: AtomicU64,
}

impl MemoryBlobClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls (dry-run purity assertions)
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Raw bytes of a stored blob
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(key).cloned()
    }
}

#[async_trait]
impl BlobClient for MemoryBlobClient {
    async fn put(&self, ctx: &RequestContext, key: &str, bytes: Vec<u8>) -> Result<()> {
        ctx.check("blob_store.put")?;
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.blobs.lock().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<Vec<u8>> {
        ctx.check("blob_store.get")?;
        self.blobs
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| VaultSyncError::not_found(key))
    }

    async fn list(&self, ctx: &RequestContext, prefix: &str) -> Result<Vec<String>> {
        ctx.check("blob_store.list")?;
        Ok(self
            .blobs
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Shared handle type used when wiring memory backends into the pipeline
pub type SharedMemoryStore = Arc<MemorySecretStoreClient>;

/// Factory handing out one [`MemorySecretStoreClient`] per target name
#[derive(Debug, Default)]
pub struct MemoryStoreFactory {
    stores: Mutex<HashMap<String, SharedMemoryStore>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing store for a target, creating it on first use
    pub fn store(&self, name: &str) -> SharedMemoryStore {
        let mut stores = self.stores.lock();
        stores.entry(name.to_string()).or_default().clone()
    }
}

#[async_trait]
impl crate::store::client::SecretStoreFactory for MemoryStoreFactory {
    async fn client_for(
        &self,
        target: &crate::config::TargetConfig,
    ) -> Result<Arc<dyn SecretStoreClient>> {
        let client: Arc<dyn SecretStoreClient> = self.store(&target.name);
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(json: serde_json::Value) -> SecretTree {
        SecretTree::from(json)
    }

    #[tokio::test]
    async fn test_create_then_update_bumps_version() {
        let store = MemorySecretStoreClient::new();
        let ctx = RequestContext::new();

        let v1 = store.create(&ctx, "app/db", &tree(serde_json::json!({"a": 1}))).await.unwrap();
        assert_eq!(v1, "1");
        let v2 = store.update(&ctx, "app/db", &tree(serde_json::json!({"a": 2}))).await.unwrap();
        assert_eq!(v2, "2");
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let store = MemorySecretStoreClient::new();
        let ctx = RequestContext::new();

        store.create(&ctx, "app/db", &tree(serde_json::json!(1))).await.unwrap();
        let err = store.create(&ctx, "app/db", &tree(serde_json::json!(2))).await.unwrap_err();
        assert!(matches!(err, VaultSyncError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_fails() {
        let store = MemorySecretStoreClient::new();
        let ctx = RequestContext::new();
        let err = store.update(&ctx, "none", &tree(serde_json::json!(1))).await.unwrap_err();
        assert!(matches!(err, VaultSyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_blob_put_get_list() {
        let blobs = MemoryBlobClient::new();
        let ctx = RequestContext::new();

        blobs.put(&ctx, "p/t/a.json", b"{}".to_vec()).await.unwrap();
        blobs.put(&ctx, "p/t/b.json", b"{}".to_vec()).await.unwrap();
        blobs.put(&ctx, "p/u/c.json", b"{}".to_vec()).await.unwrap();

        assert_eq!(blobs.get(&ctx, "p/t/a.json").await.unwrap(), b"{}".to_vec());
        assert_eq!(blobs.list(&ctx, "p/t/").await.unwrap(), vec!["p/t/a.json", "p/t/b.json"]);
    }
}
