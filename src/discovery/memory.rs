//! In-memory organization directory for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::client::{AccountInfo, OrgDirectoryClient};
use crate::context::RequestContext;
use crate::errors::{Result, VaultSyncError};

/// In-memory implementation of [`OrgDirectoryClient`]
#[derive(Debug, Default)]
pub struct MemoryOrgDirectoryClient {
    accounts_by_ou: HashMap<String, Vec<AccountInfo>>,
    child_ous: HashMap<String, Vec<String>>,
    accessible: bool,
    /// OUs whose child listing fails (permission-gap simulation)
    deny_child_listing: Vec<String>,
    calls: Mutex<u64>,
}

impl MemoryOrgDirectoryClient {
    pub fn new() -> Self {
        Self { accessible: true, ..Default::default() }
    }

    pub fn inaccessible() -> Self {
        Self { accessible: false, ..Default::default() }
    }

    pub fn add_ou(mut self, ou: &str, accounts: Vec<AccountInfo>) -> Self {
        self.accounts_by_ou.insert(ou.to_string(), accounts);
        self
    }

    pub fn add_child_ous(mut self, parent: &str, children: Vec<&str>) -> Self {
        self.child_ous
            .insert(parent.to_string(), children.into_iter().map(String::from).collect());
        self
    }

    pub fn deny_child_listing(mut self, ou: &str) -> Self {
        self.deny_child_listing.push(ou.to_string());
        self
    }

    /// Number of listing calls that reached the client (cache assertions)
    pub fn call_count(&self) -> u64 {
        *self.calls.lock()
    }
}

#[async_trait]
impl OrgDirectoryClient for MemoryOrgDirectoryClient {
    fn can_access(&self) -> bool {
        self.accessible
    }

    async fn list_accounts_in_ou(
        &self,
        ctx: &RequestContext,
        ou: &str,
    ) -> Result<Vec<AccountInfo>> {
        ctx.check("discovery.list_accounts_in_ou")?;
        *self.calls.lock() += 1;
        Ok(self.accounts_by_ou.get(ou).cloned().unwrap_or_default())
    }

    async fn list_child_ous(&self, ctx: &RequestContext, ou: &str) -> Result<Vec<String>> {
        ctx.check("discovery.list_child_ous")?;
        *self.calls.lock() += 1;
        if self.deny_child_listing.iter().any(|d| d == ou) {
            return Err(VaultSyncError::permission_denied(
                "discovery.list_child_ous",
                format!("cannot list children of {}", ou),
            ));
        }
        Ok(self.child_ous.get(ou).cloned().unwrap_or_default())
    }

    async fn list_all_accounts(&self, ctx: &RequestContext) -> Result<Vec<AccountInfo>> {
        ctx.check("discovery.list_all_accounts")?;
        *self.calls.lock() += 1;
        let mut all: Vec<AccountInfo> =
            self.accounts_by_ou.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all.dedup_by(|a, b| a.id == b.id);
        Ok(all)
    }
}
