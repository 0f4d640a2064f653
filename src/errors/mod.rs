//! Error handling for the vaultsync pipeline.

mod types;

pub use types::{Result, VaultSyncError};

/// Convenient alias used throughout the crate
pub type Error = VaultSyncError;
