//! Common test utilities for all integration tests.
//!
//! Builds pipelines over the in-memory backends and keeps handles to them
//! so tests can assert on store contents, blob writes, and call counts.

#![allow(dead_code)]

use std::sync::Arc;

use vaultsync::config::{
    AppConfig, MergeStoreConfig, MergeStoreKind, SourceConfig, TargetConfig, TargetKind,
};
use vaultsync::discovery::MemoryOrgDirectoryClient;
use vaultsync::merge::SecretTree;
use vaultsync::pipeline::{PipelineBuilder, PipelineExecutor};
use vaultsync::source::MemorySourceClient;
use vaultsync::store::{MemoryBlobClient, MemoryStoreFactory};

pub fn tree(json: serde_json::Value) -> SecretTree {
    SecretTree::from(json)
}

pub fn source_config(mount: &str) -> SourceConfig {
    SourceConfig { mount: mount.to_string(), max_secrets: 10_000, queue_compaction_threshold: 256 }
}

/// A memory-backed target importing the merge-phase output
pub fn memory_target(name: &str) -> TargetConfig {
    let mut target = TargetConfig::named(name);
    target.kind = TargetKind::Memory;
    target.imports = vec!["base_merged".to_string()];
    target
}

pub fn enabled_merge_store() -> MergeStoreConfig {
    MergeStoreConfig {
        enabled: true,
        kind: MergeStoreKind::Memory,
        location: String::new(),
        prefix: "merge-state".to_string(),
    }
}

/// A memory source serving the given leaf path -> value pairs
pub fn memory_source(
    secrets: Vec<(&str, serde_json::Value)>,
) -> Arc<MemorySourceClient> {
    Arc::new(MemorySourceClient::from_secrets(
        secrets.into_iter().map(|(path, value)| (path.to_string(), tree(value))),
    ))
}

/// A built pipeline plus handles to its in-memory backends
pub struct Harness {
    pub executor: PipelineExecutor,
    pub factory: Arc<MemoryStoreFactory>,
    pub blob: Arc<MemoryBlobClient>,
}

pub fn harness(config: AppConfig, sources: Vec<Arc<MemorySourceClient>>) -> Harness {
    harness_with_org(config, sources, None)
}

pub fn harness_with_org(
    config: AppConfig,
    sources: Vec<Arc<MemorySourceClient>>,
    org: Option<Arc<MemoryOrgDirectoryClient>>,
) -> Harness {
    let factory = Arc::new(MemoryStoreFactory::new());
    let blob = Arc::new(MemoryBlobClient::new());

    let mut builder =
        PipelineBuilder::new(config.clone()).with_store_factory(factory.clone());
    for source in sources {
        builder = builder.with_source_client(source);
    }
    if config.merge_store.enabled {
        builder = builder.with_blob_client(blob.clone());
    }
    if let Some(org) = org {
        builder = builder.with_org_client(org);
    }

    Harness { executor: builder.build().expect("harness config should build"), factory, blob }
}
