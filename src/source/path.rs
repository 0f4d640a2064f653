//! Secret path validation and normalization.
//!
//! Paths are forward-slash-delimited hierarchical keys. A trailing slash
//! marks a directory in source listings. Validation rejects `..` segments,
//! NUL bytes, and empty segments; a leading `/` is normalized off.

use crate::errors::{Result, VaultSyncError};

/// Validate a path and return its normalized form
///
/// Strips leading slashes and preserves a single trailing slash (the
/// directory marker). Fails with `InvalidPath` on `..` segments, embedded
/// NUL bytes, or empty segments.
pub fn validate_path(path: &str) -> Result<String> {
    if path.contains('\0') {
        return Err(VaultSyncError::invalid_path(path.replace('\0', "\\0"), "contains NUL byte"));
    }

    let is_dir = path.ends_with('/');
    let trimmed = path.trim_start_matches('/');
    let core = trimmed.trim_end_matches('/');

    if core.is_empty() {
        return Err(VaultSyncError::invalid_path(path, "path is empty"));
    }
    // A directory marker is a single trailing slash; "a//" has an empty segment.
    if is_dir && trimmed.len() > core.len() + 1 {
        return Err(VaultSyncError::invalid_path(path, "empty path segment"));
    }

    for segment in core.split('/') {
        if segment.is_empty() {
            return Err(VaultSyncError::invalid_path(path, "empty path segment"));
        }
        if segment == ".." {
            return Err(VaultSyncError::invalid_path(path, "path contains '..'"));
        }
    }

    let mut normalized = core.to_string();
    if is_dir {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Join a directory path and a child name without fabricating empty segments
///
/// The child's trailing slash (directory marker) is preserved.
pub fn join(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", base, child)
    }
}

/// Whether a listed name denotes a directory
pub fn is_dir(name: &str) -> bool {
    name.ends_with('/')
}

/// Canonical identity of a directory path for visited-set bookkeeping
pub fn dir_key(path: &str) -> &str {
    path.trim_end_matches('/')
}
