//! Dynamic account discovery from an organization directory.
//!
//! Discovery expands target templates into concrete per-account targets
//! before planning. Accounts come from an OU subtree (depth-first, with a
//! child-OU listing failure logged and treated as empty) or from the whole
//! organization when only tag patterns are configured. Results are cached
//! by config hash with a TTL and refreshed under single-flight.

pub mod client;
pub mod filter;
pub mod memory;

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::breaker::{retry, CircuitBreaker, RetryPolicy};
use crate::config::{DiscoveryConfig, DiscoveryKind, TargetConfig};
use crate::context::{Clock, RequestContext};
use crate::errors::{Result, VaultSyncError};
use crate::observability::metrics;

pub use client::{AccountInfo, OrgDirectoryClient};
pub use memory::MemoryOrgDirectoryClient;

/// Placeholder substituted with the account id during target expansion
pub const PLACEHOLDER_ACCOUNT_ID: &str = "{account_id}";
/// Placeholder substituted with the account name during target expansion
pub const PLACEHOLDER_ACCOUNT_NAME: &str = "{account_name}";

/// Outcome of one discovery pass
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub accounts: Vec<AccountInfo>,
    /// OU subtrees skipped because their child listing failed; surfaced as
    /// a warning in the run summary since it can hide permission gaps
    pub skipped_subtrees: usize,
}

#[derive(Debug, Clone)]
struct CachedOutcome {
    outcome: DiscoveryOutcome,
    inserted_at: Instant,
}

/// Discovery service over an [`OrgDirectoryClient`]
pub struct DiscoveryService {
    client: Arc<dyn OrgDirectoryClient>,
    cache: RwLock<HashMap<u64, CachedOutcome>>,
    clock: Arc<dyn Clock>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl DiscoveryService {
    pub fn new(
        client: Arc<dyn OrgDirectoryClient>,
        clock: Arc<dyn Clock>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        Self { client, cache: RwLock::new(HashMap::new()), clock, breaker, retry }
    }

    fn cache_ttl(kind: DiscoveryKind) -> Duration {
        match kind {
            DiscoveryKind::Organizations => Duration::from_secs(60 * 60),
            DiscoveryKind::IdentityCenter => Duration::from_secs(30 * 60),
        }
    }

    fn config_hash(config: &DiscoveryConfig) -> u64 {
        let mut hasher = DefaultHasher::new();
        config.hash(&mut hasher);
        hasher.finish()
    }

    /// Discover accounts matching the configuration
    pub async fn discover(
        &self,
        ctx: &RequestContext,
        config: &DiscoveryConfig,
    ) -> Result<DiscoveryOutcome> {
        let key = Self::config_hash(config);
        let ttl = Self::cache_ttl(config.kind);

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if self.clock.now().saturating_duration_since(entry.inserted_at) < ttl {
                    debug!(kind = ?config.kind, "Discovery cache hit");
                    return Ok(entry.outcome.clone());
                }
            }
        }

        // Refresh under the write lock: double-checked so only one caller
        // per key performs the listing (single-flight).
        let mut cache = self.cache.write().await;
        if let Some(entry) = cache.get(&key) {
            if self.clock.now().saturating_duration_since(entry.inserted_at) < ttl {
                return Ok(entry.outcome.clone());
            }
        }

        let started = Instant::now();
        let outcome = self.discover_uncached(ctx, config).await?;
        metrics::record_discovery(outcome.accounts.len(), started.elapsed());

        cache.insert(key, CachedOutcome { outcome: outcome.clone(), inserted_at: self.clock.now() });
        Ok(outcome)
    }

    async fn discover_uncached(
        &self,
        ctx: &RequestContext,
        config: &DiscoveryConfig,
    ) -> Result<DiscoveryOutcome> {
        debug!(
            ou = config.root_ou.as_deref().unwrap_or(""),
            recursive = config.recursive,
            "Discovering accounts from the organization directory"
        );

        if !self.client.can_access() {
            return Err(VaultSyncError::permission_denied(
                "discovery",
                "no access to the organization directory from this execution context",
            ));
        }

        let compiled_globs = filter::compile_tag_globs(&config.tag_globs)?;

        let mut outcome = DiscoveryOutcome::default();
        match &config.root_ou {
            Some(root) if config.recursive => {
                self.walk_ou_subtree(ctx, root, &mut outcome).await?;
            }
            Some(root) => {
                outcome.accounts = self.list_accounts_in_ou(ctx, root).await?;
            }
            None if !config.tag_globs.is_empty() => {
                outcome.accounts =
                    retry::execute(ctx, &self.retry, &self.breaker, "discovery.list_all", || {
                        self.client.list_all_accounts(ctx)
                    })
                    .await?;
            }
            None => {
                return Err(VaultSyncError::validation(
                    "discovery requires a root OU or at least one tag pattern",
                ));
            }
        }

        outcome.accounts.retain(|account| {
            filter::matches_status(account, &config.status_in)
                && filter::matches_tags(account, &compiled_globs, config.and_or)
        });

        if outcome.skipped_subtrees > 0 {
            warn!(
                skipped = outcome.skipped_subtrees,
                "Some OU subtrees could not be listed and were skipped; \
                 discovery results may be incomplete"
            );
        }
        debug!(count = outcome.accounts.len(), "Discovered accounts");
        Ok(outcome)
    }

    async fn list_accounts_in_ou(
        &self,
        ctx: &RequestContext,
        ou: &str,
    ) -> Result<Vec<AccountInfo>> {
        retry::execute(ctx, &self.retry, &self.breaker, "discovery.list_accounts_in_ou", || {
            self.client.list_accounts_in_ou(ctx, ou)
        })
        .await
    }

    /// Depth-first traversal of an OU subtree.
    ///
    /// The root OU's account listing failure is fatal. Below the root a
    /// child-OU listing failure is logged, counted, and that subtree is
    /// skipped.
    async fn walk_ou_subtree(
        &self,
        ctx: &RequestContext,
        root: &str,
        outcome: &mut DiscoveryOutcome,
    ) -> Result<()> {
        let mut stack: Vec<String> = vec![root.to_string()];
        let mut seen: HashSet<String> = HashSet::new();
        let mut is_root = true;

        while let Some(ou) = stack.pop() {
            ctx.check("discovery.walk")?;
            if !seen.insert(ou.clone()) {
                continue;
            }

            match self.list_accounts_in_ou(ctx, &ou).await {
                Ok(accounts) => outcome.accounts.extend(accounts),
                Err(err) if is_root => return Err(err),
                Err(err) => {
                    debug!(ou = %ou, error = %err, "Error listing accounts in child OU");
                    outcome.skipped_subtrees += 1;
                    continue;
                }
            }
            is_root = false;

            let children = match retry::execute(
                ctx,
                &self.retry,
                &self.breaker,
                "discovery.list_child_ous",
                || self.client.list_child_ous(ctx, &ou),
            )
            .await
            {
                Ok(children) => children,
                Err(err) => {
                    debug!(ou = %ou, error = %err, "Could not list child OUs");
                    outcome.skipped_subtrees += 1;
                    continue;
                }
            };

            for child in children {
                stack.push(child);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DiscoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryService").finish()
    }
}

/// Whether a target is a template that expands per discovered account
pub fn is_template(target: &TargetConfig) -> bool {
    target.name.contains(PLACEHOLDER_ACCOUNT_ID) || target.name.contains(PLACEHOLDER_ACCOUNT_NAME)
}

fn substitute(input: &str, account: &AccountInfo) -> String {
    input
        .replace(PLACEHOLDER_ACCOUNT_ID, &account.id)
        .replace(PLACEHOLDER_ACCOUNT_NAME, &account.name)
}

/// Expand target templates into concrete per-account targets.
///
/// Non-template targets pass through unchanged. A template's name, region,
/// and role may all carry placeholders.
pub fn expand_targets(targets: &[TargetConfig], accounts: &[AccountInfo]) -> Vec<TargetConfig> {
    let mut expanded = Vec::new();
    for target in targets {
        if !is_template(target) {
            expanded.push(target.clone());
            continue;
        }
        for account in accounts {
            let mut concrete = target.clone();
            concrete.name = substitute(&target.name, account);
            concrete.region = target.region.as_deref().map(|r| substitute(r, account));
            concrete.role = target.role.as_deref().map(|r| substitute(r, account));
            expanded.push(concrete);
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::config::{TagGlob, TagMatchMode};
    use crate::context::{ManualClock, SystemClock};

    fn service(client: MemoryOrgDirectoryClient) -> DiscoveryService {
        DiscoveryService::new(
            Arc::new(client),
            Arc::new(SystemClock),
            Arc::new(CircuitBreaker::new(
                "discovery",
                BreakerConfig::default(),
                Arc::new(SystemClock),
            )),
            RetryPolicy::default(),
        )
    }

    fn base_config() -> DiscoveryConfig {
        DiscoveryConfig {
            enabled: true,
            kind: DiscoveryKind::Organizations,
            root_ou: None,
            recursive: false,
            tag_globs: Vec::new(),
            and_or: TagMatchMode::And,
            status_in: Vec::new(),
            role: None,
        }
    }

    fn tagged(id: &str, tags: &[(&str, &str)]) -> AccountInfo {
        let mut account = AccountInfo::new(id, format!("acct-{}", id));
        for (k, v) in tags {
            account = account.with_tag(*k, *v);
        }
        account
    }

    #[tokio::test]
    async fn test_and_or_tag_filtering() {
        let client = MemoryOrgDirectoryClient::new().add_ou(
            "root",
            vec![
                tagged("1", &[("env", "prod"), ("role", "a")]),
                tagged("2", &[("env", "stg"), ("role", "a")]),
                tagged("3", &[("env", "prod")]),
            ],
        );
        let service = service(client);
        let ctx = RequestContext::new();

        let mut config = base_config();
        config.tag_globs = vec![
            TagGlob { key: "env".into(), value: "pr*".into() },
            TagGlob { key: "role".into(), value: "a".into() },
        ];

        let and_result = service.discover(&ctx, &config).await.unwrap();
        let and_ids: Vec<&str> = and_result.accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(and_ids, vec!["1"]);

        config.and_or = TagMatchMode::Or;
        let or_result = service.discover(&ctx, &config).await.unwrap();
        let or_ids: Vec<&str> = or_result.accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(or_ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_recursive_ou_traversal() {
        let client = MemoryOrgDirectoryClient::new()
            .add_ou("root", vec![tagged("1", &[])])
            .add_ou("child-a", vec![tagged("2", &[])])
            .add_ou("grandchild", vec![tagged("3", &[])])
            .add_child_ous("root", vec!["child-a"])
            .add_child_ous("child-a", vec!["grandchild"]);
        let service = service(client);

        let mut config = base_config();
        config.root_ou = Some("root".to_string());
        config.recursive = true;

        let outcome = service.discover(&RequestContext::new(), &config).await.unwrap();
        let mut ids: Vec<&str> = outcome.accounts.iter().map(|a| a.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(outcome.skipped_subtrees, 0);
    }

    #[tokio::test]
    async fn test_non_recursive_lists_direct_accounts_only() {
        let client = MemoryOrgDirectoryClient::new()
            .add_ou("root", vec![tagged("1", &[])])
            .add_ou("child-a", vec![tagged("2", &[])])
            .add_child_ous("root", vec!["child-a"]);
        let service = service(client);

        let mut config = base_config();
        config.root_ou = Some("root".to_string());

        let outcome = service.discover(&RequestContext::new(), &config).await.unwrap();
        assert_eq!(outcome.accounts.len(), 1);
        assert_eq!(outcome.accounts[0].id, "1");
    }

    #[tokio::test]
    async fn test_child_ou_listing_failure_skips_subtree() {
        let client = MemoryOrgDirectoryClient::new()
            .add_ou("root", vec![tagged("1", &[])])
            .add_ou("open", vec![tagged("2", &[])])
            .add_child_ous("root", vec!["open"])
            .deny_child_listing("open");
        let service = service(client);

        let mut config = base_config();
        config.root_ou = Some("root".to_string());
        config.recursive = true;

        let outcome = service.discover(&RequestContext::new(), &config).await.unwrap();
        let mut ids: Vec<&str> = outcome.accounts.iter().map(|a| a.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(outcome.skipped_subtrees, 1);
    }

    #[tokio::test]
    async fn test_status_filter() {
        let client = MemoryOrgDirectoryClient::new().add_ou(
            "root",
            vec![tagged("1", &[]), tagged("2", &[]).with_status("SUSPENDED")],
        );
        let service = service(client);

        let mut config = base_config();
        config.root_ou = Some("root".to_string());
        config.status_in = vec!["ACTIVE".to_string()];

        let outcome = service.discover(&RequestContext::new(), &config).await.unwrap();
        assert_eq!(outcome.accounts.len(), 1);
        assert_eq!(outcome.accounts[0].id, "1");
    }

    #[tokio::test]
    async fn test_no_access_fails() {
        let service = service(MemoryOrgDirectoryClient::inaccessible());
        let mut config = base_config();
        config.root_ou = Some("root".to_string());

        let err = service.discover(&RequestContext::new(), &config).await.unwrap_err();
        assert!(matches!(err, VaultSyncError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_results_cached_until_ttl() {
        let client = MemoryOrgDirectoryClient::new().add_ou("root", vec![tagged("1", &[])]);
        let manual = Arc::new(ManualClock::new());
        let client = Arc::new(client);
        let service = DiscoveryService::new(
            client.clone(),
            manual.clone(),
            Arc::new(CircuitBreaker::new(
                "discovery",
                BreakerConfig::default(),
                Arc::new(SystemClock),
            )),
            RetryPolicy::default(),
        );

        let mut config = base_config();
        config.root_ou = Some("root".to_string());
        let ctx = RequestContext::new();

        service.discover(&ctx, &config).await.unwrap();
        service.discover(&ctx, &config).await.unwrap();
        assert_eq!(client.call_count(), 1);

        manual.advance(Duration::from_secs(61 * 60));
        service.discover(&ctx, &config).await.unwrap();
        assert_eq!(client.call_count(), 2);
    }

    #[test]
    fn test_template_expansion() {
        let template = TargetConfig {
            name: "prod-{account_id}".to_string(),
            region: Some("{account_name}-east".to_string()),
            role: Some("sync-{account_id}".to_string()),
            ..TargetConfig::named("prod-{account_id}")
        };
        let fixed = TargetConfig::named("static");

        let accounts = vec![AccountInfo::new("111", "alpha"), AccountInfo::new("222", "beta")];
        let expanded = expand_targets(&[template, fixed], &accounts);

        let names: Vec<&str> = expanded.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["prod-111", "prod-222", "static"]);
        assert_eq!(expanded[0].region.as_deref(), Some("alpha-east"));
        assert_eq!(expanded[1].role.as_deref(), Some("sync-222"));
    }
}
