//! Organization directory client trait.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::errors::Result;

/// One account in the organization directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    pub email: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Path of organizational units from the root, when known
    pub ou_path: Option<Vec<String>>,
}

impl AccountInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: "ACTIVE".to_string(),
            email: None,
            tags: HashMap::new(),
            ou_path: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Client for the organization directory (account listing by OU or
/// organization-wide)
#[async_trait]
pub trait OrgDirectoryClient: Send + Sync {
    /// Whether the execution context can reach the organization API at all
    fn can_access(&self) -> bool;

    /// Accounts directly under one organizational unit
    async fn list_accounts_in_ou(
        &self,
        ctx: &RequestContext,
        ou: &str,
    ) -> Result<Vec<AccountInfo>>;

    /// Direct child organizational units of one OU
    async fn list_child_ous(&self, ctx: &RequestContext, ou: &str) -> Result<Vec<String>>;

    /// Every account in the organization
    async fn list_all_accounts(&self, ctx: &RequestContext) -> Result<Vec<AccountInfo>>;
}
