//! Wires collaborator clients into an executor for the CLI.
//!
//! The binary is self-contained only for `memory` backends; real vault,
//! cloud secret manager, and organization directory clients carry
//! credentials and are supplied by the embedding application through
//! [`PipelineBuilder`]. Plan and validate paths never need clients.

use std::sync::Arc;

use crate::config::{AppConfig, MergeStoreKind, TargetKind};
use crate::discovery::MemoryOrgDirectoryClient;
use crate::errors::{Result, VaultSyncError};
use crate::pipeline::{PipelineBuilder, PipelineExecutor};
use crate::source::MemorySourceClient;
use crate::store::{MemoryBlobClient, MemoryStoreFactory};

/// Build an executor from configuration alone.
///
/// Only `memory` target and merge-store kinds can be wired without an
/// embedding application; anything else needs injected clients.
pub fn build_executor(config: AppConfig) -> Result<PipelineExecutor> {
    for target in &config.targets {
        if target.kind != TargetKind::Memory {
            return Err(VaultSyncError::validation(format!(
                "target '{}' has kind {:?}: the vaultsync binary only wires memory backends; \
                 embed vaultsync as a library and register a store factory for this kind",
                target.name, target.kind
            )));
        }
    }
    if config.merge_store.enabled && config.merge_store.kind != MergeStoreKind::Memory {
        return Err(VaultSyncError::validation(
            "only the memory merge store kind can be wired by the binary",
        ));
    }

    let mut builder = PipelineBuilder::new(config.clone())
        .with_store_factory(Arc::new(MemoryStoreFactory::new()));

    for _source in &config.sources {
        builder = builder.with_source_client(Arc::new(MemorySourceClient::from_secrets(vec![])));
    }
    if config.merge_store.enabled {
        builder = builder.with_blob_client(Arc::new(MemoryBlobClient::new()));
    }
    if config.discovery.enabled {
        builder = builder.with_org_client(Arc::new(MemoryOrgDirectoryClient::new()));
    }

    builder.build()
}
