//! Source client trait for hierarchical secret namespaces.

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::errors::Result;
use crate::merge::SecretTree;

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Entry name relative to the listed directory; directories carry a
    /// trailing slash
    pub name: String,
    pub is_dir: bool,
}

impl SourceEntry {
    pub fn dir(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self { name, is_dir: true }
    }

    pub fn leaf(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_dir: false }
    }
}

/// Client for a hierarchical secret source (a KV-style vault mount).
///
/// Authentication and token refresh are the client's concern; the core
/// only sees `list` and `read`. Errors surface in the crate taxonomy:
/// `NotFound` for missing leaves, `Transient` for retryable failures,
/// `PermissionDenied` for authorization failures.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// List the direct children of a directory
    async fn list(&self, ctx: &RequestContext, path: &str) -> Result<Vec<SourceEntry>>;

    /// Read the latest version of a leaf secret
    async fn read(&self, ctx: &RequestContext, path: &str)
        -> Result<(SecretTree, Option<String>)>;
}
