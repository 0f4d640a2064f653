//! Discovery-driven target expansion, end to end.

mod common;

use std::sync::Arc;

use common::*;
use vaultsync::config::{AppConfig, DiscoveryConfig, DiscoveryKind, TagGlob, TagMatchMode};
use vaultsync::context::RequestContext;
use vaultsync::discovery::{AccountInfo, MemoryOrgDirectoryClient};
use vaultsync::pipeline::{RunOptions, RunOutcome};

fn discovery_config(tag_globs: Vec<TagGlob>, and_or: TagMatchMode) -> DiscoveryConfig {
    DiscoveryConfig {
        enabled: true,
        kind: DiscoveryKind::Organizations,
        root_ou: Some("root".to_string()),
        recursive: false,
        tag_globs,
        and_or,
        status_in: vec![],
        role: None,
    }
}

fn org_with_accounts() -> Arc<MemoryOrgDirectoryClient> {
    Arc::new(MemoryOrgDirectoryClient::new().add_ou(
        "root",
        vec![
            AccountInfo::new("1", "alpha").with_tag("env", "prod").with_tag("role", "a"),
            AccountInfo::new("2", "beta").with_tag("env", "stg").with_tag("role", "a"),
            AccountInfo::new("3", "gamma").with_tag("env", "prod"),
        ],
    ))
}

#[tokio::test]
async fn test_and_filter_expands_matching_accounts_only() {
    let source = memory_source(vec![("kv/app", serde_json::json!({"a": 1}))]);
    let mut template = memory_target("sync-{account_id}");
    template.imports = vec!["base_merged".to_string()];

    let config = AppConfig {
        sources: vec![source_config("kv")],
        targets: vec![template],
        discovery: discovery_config(
            vec![
                TagGlob { key: "env".into(), value: "pr*".into() },
                TagGlob { key: "role".into(), value: "a".into() },
            ],
            TagMatchMode::And,
        ),
        ..Default::default()
    };

    let h = harness_with_org(config, vec![source], Some(org_with_accounts()));
    let report = h.executor.run(&RequestContext::new(), RunOptions::default()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Changed);
    assert_eq!(report.discovered_accounts, Some(1));
    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.targets[0].target, "sync-1");
    assert!(h.factory.store("sync-1").value_of("kv/app").is_some());
}

#[tokio::test]
async fn test_or_filter_expands_all_matching_accounts() {
    let source = memory_source(vec![("kv/app", serde_json::json!({"a": 1}))]);
    let template = memory_target("sync-{account_id}");

    let config = AppConfig {
        sources: vec![source_config("kv")],
        targets: vec![template],
        discovery: discovery_config(
            vec![
                TagGlob { key: "env".into(), value: "pr*".into() },
                TagGlob { key: "role".into(), value: "a".into() },
            ],
            TagMatchMode::Or,
        ),
        ..Default::default()
    };

    let h = harness_with_org(config, vec![source], Some(org_with_accounts()));
    let report = h.executor.run(&RequestContext::new(), RunOptions::default()).await.unwrap();

    assert_eq!(report.discovered_accounts, Some(3));
    let mut names: Vec<&str> = report.targets.iter().map(|t| t.target.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["sync-1", "sync-2", "sync-3"]);
}

#[tokio::test]
async fn test_skipped_subtrees_surface_in_report() {
    let source = memory_source(vec![("kv/app", serde_json::json!(1))]);
    let org = Arc::new(
        MemoryOrgDirectoryClient::new()
            .add_ou("root", vec![AccountInfo::new("1", "alpha")])
            .add_ou("locked", vec![AccountInfo::new("2", "beta")])
            .add_child_ous("root", vec!["locked"])
            .deny_child_listing("locked"),
    );

    let mut discovery = discovery_config(vec![], TagMatchMode::And);
    discovery.recursive = true;

    let config = AppConfig {
        sources: vec![source_config("kv")],
        targets: vec![memory_target("sync-{account_id}")],
        discovery,
        ..Default::default()
    };

    let h = harness_with_org(config, vec![source], Some(org));
    let report = h.executor.run(&RequestContext::new(), RunOptions::default()).await.unwrap();

    // The locked OU's accounts still synced; only its children were skipped.
    assert_eq!(report.discovered_accounts, Some(2));
    assert_eq!(report.discovery_skipped_subtrees, 1);
}

#[tokio::test]
async fn test_inaccessible_directory_fails_the_run() {
    let source = memory_source(vec![]);
    let config = AppConfig {
        sources: vec![source_config("kv")],
        targets: vec![memory_target("sync-{account_id}")],
        discovery: discovery_config(vec![], TagMatchMode::And),
        ..Default::default()
    };

    let h = harness_with_org(
        config,
        vec![source],
        Some(Arc::new(MemoryOrgDirectoryClient::inaccessible())),
    );
    let err = h.executor.run(&RequestContext::new(), RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, vaultsync::errors::VaultSyncError::PermissionDenied { .. }));
}
