//! Hierarchical secret sources.
//!
//! A source is a KV-style mount readable through [`SourceClient`]. The
//! [`SourceReader`] walks it breadth-first with cycle detection and a
//! `max_secrets` bound; [`path`] holds the shared path validation rules.

pub mod client;
pub mod memory;
pub mod path;
pub mod reader;

pub use client::{SourceClient, SourceEntry};
pub use memory::MemorySourceClient;
pub use reader::SourceReader;
