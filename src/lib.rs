//! # Vaultsync
//!
//! Vaultsync synchronizes secrets from hierarchical KV-style sources into
//! one or more external secret stores across many accounts and regions,
//! through a two-phase pipeline:
//!
//! ```text
//! Sources ──list+read──> Deep Merge ──> Blob Merge Store (base_merged)
//!                                            │
//!                 per target: imports ───────┤
//!                            overrides ──────┼──> Diff vs Target Store ──> Apply
//!                                            └──> Blob Merge Store (<target>)
//! ```
//!
//! ## Core Components
//!
//! - **Merge engine** ([`merge`]): the deterministic deep-merge law over
//!   tree-shaped secret values
//! - **Source reader** ([`source`]): breadth-first listing with cycle
//!   detection and bounds
//! - **Target store** ([`store`]): cached, upserting access to external
//!   secret managers; blob merge store for target inheritance
//! - **Discovery** ([`discovery`]): account enumeration from an
//!   organization directory with tag-glob filtering and template expansion
//! - **Circuit breakers** ([`breaker`]): per-service failure gates with
//!   retry and backoff
//! - **Pipeline** ([`pipeline`]): topological planning and the
//!   bounded-concurrency two-phase executor
//!
//! External collaborators (vault clients, cloud secret manager clients,
//! object stores, the organization directory) plug in through the traits
//! in [`source::SourceClient`], [`store::SecretStoreClient`],
//! [`store::BlobClient`], and [`discovery::OrgDirectoryClient`].

pub mod breaker;
pub mod cli;
pub mod config;
pub mod context;
pub mod diff;
pub mod discovery;
pub mod errors;
pub mod merge;
pub mod observability;
pub mod pipeline;
pub mod source;
pub mod startup;
pub mod store;

// Re-export commonly used types
pub use config::{AppConfig, Config};
pub use context::RequestContext;
pub use errors::{Error, Result, VaultSyncError};
pub use merge::{deep_merge, MergedBundle, SecretTree};
pub use pipeline::{PipelineBuilder, PipelineExecutor, RunOptions, RunReport};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
