//! External secret stores and the blob merge store.

pub mod blob;
pub mod client;
pub mod memory;
pub mod target;

pub use blob::{BlobClient, BlobMergeStore};
pub use client::{SecretRecord, SecretStoreClient, SecretStoreFactory};
pub use memory::{MemoryBlobClient, MemorySecretStoreClient, MemoryStoreFactory};
pub use target::{ListingCache, TargetStore};
