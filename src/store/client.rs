//! Secret store client trait and record types.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::errors::Result;
use crate::merge::SecretTree;

/// Metadata about one secret stored in a target backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretRecord {
    /// Hierarchical key of the record
    pub path: String,

    /// Version identifier (if the backend supports versioning)
    pub version: Option<String>,

    /// Tags attached to the record
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl SecretRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), version: None, tags: HashMap::new() }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Client for one external secret store (a cloud secret manager).
///
/// Multiple backend kinds are expressed as implementations of this trait;
/// dispatch happens at factory time by target kind and the core stays
/// variant-agnostic. Paginated iteration is the client's concern: `list`
/// must exhaust server cursors before returning.
///
/// # Security Considerations
///
/// - Implementations MUST NOT log secret values
/// - Network communication MUST use TLS
/// - Errors must never embed payloads, only paths and operations
#[async_trait]
pub trait SecretStoreClient: Send + Sync {
    /// List all records (metadata only), exhausting pagination.
    ///
    /// Implementations should surface their page count through
    /// [`crate::observability::metrics::record_pagination`].
    async fn list(&self, ctx: &RequestContext) -> Result<Vec<SecretRecord>>;

    /// Fetch the current value of a record
    async fn get(&self, ctx: &RequestContext, path: &str) -> Result<SecretTree>;

    /// Create a record; fails with `AlreadyExists` if present.
    /// Returns the post-image version identifier.
    async fn create(&self, ctx: &RequestContext, path: &str, value: &SecretTree)
        -> Result<String>;

    /// Update a record; fails with `NotFound` if absent.
    /// Returns the post-image version identifier.
    async fn update(&self, ctx: &RequestContext, path: &str, value: &SecretTree)
        -> Result<String>;

    /// Delete a record; fails with `NotFound` if absent
    async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<()>;
}

/// Resolves a store client for one target at sync time.
///
/// Dispatch by `Target.kind` (and region/role) happens here; credential
/// acquisition is the factory's concern and the core stays
/// variant-agnostic.
#[async_trait]
pub trait SecretStoreFactory: Send + Sync {
    async fn client_for(
        &self,
        target: &crate::config::TargetConfig,
    ) -> Result<std::sync::Arc<dyn SecretStoreClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = SecretRecord::new("app/db").with_version("3").with_tag("env", "prod");
        assert_eq!(record.path, "app/db");
        assert_eq!(record.version.as_deref(), Some("3"));
        assert_eq!(record.tags.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_record_serialization_roundtrip() {
        let record = SecretRecord::new("app/db").with_version("1");
        let json = serde_json::to_string(&record).unwrap();
        let parsed: SecretRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
