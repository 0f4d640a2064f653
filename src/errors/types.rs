//! # Error Types
//!
//! Comprehensive error types for the vaultsync pipeline using `thiserror`.
//!
//! The taxonomy follows the call sites: path validation, collaborator
//! clients (source, secret store, blob store, organization directory),
//! the circuit breaker, the merge engine, and the planner. Retry policy
//! keys off [`VaultSyncError::is_retryable`].

use std::time::Duration;

/// Custom result type for vaultsync operations
pub type Result<T> = std::result::Result<T, VaultSyncError>;

/// Main error type for the vaultsync pipeline
#[derive(thiserror::Error, Debug)]
pub enum VaultSyncError {
    /// Path failed validation (`..` segments, NUL bytes, empty segments)
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A secret, blob, or record was not present
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// A record already exists where a create was attempted
    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    /// The execution context is not allowed to perform the operation
    #[error("Permission denied during {operation}: {message}")]
    PermissionDenied { operation: String, message: String },

    /// Transient failure (network, 5xx); eligible for retry
    #[error("Transient error during {operation}: {message}")]
    Transient { operation: String, message: String },

    /// The collaborator rate-limited the call; eligible for retry
    #[error("Rate limited during {operation}")]
    RateLimited { operation: String, retry_after: Option<Duration> },

    /// The per-service circuit breaker is open; call was not attempted
    #[error("Circuit breaker open for service '{service}'")]
    BreakerOpen { service: String },

    /// Deep merge exceeded the configured node budget
    #[error("Merge exceeded the configured node limit of {limit}")]
    MergeBoundExceeded { limit: usize },

    /// The target import graph contains a cycle
    #[error("Circular imports among targets: {remaining:?}")]
    CircularTargets { remaining: Vec<String> },

    /// A target's import chain loops back on itself at sync time
    #[error("Target '{target}' has a circular or unresolvable import '{import}'")]
    CircularImports { target: String, import: String },

    /// The request context was cancelled
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// The request deadline elapsed
    #[error("Operation timed out: {operation} after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl VaultSyncError {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into(), reason: reason.into() }
    }

    /// Create a not found error
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create an already exists error
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Create a permission denied error
    pub fn permission_denied(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PermissionDenied { operation: operation.into(), message: message.into() }
    }

    /// Create a transient error
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient { operation: operation.into(), message: message.into() }
    }

    /// Create a rate limited error
    pub fn rate_limited(operation: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited { operation: operation.into(), retry_after }
    }

    /// Create a breaker open error
    pub fn breaker_open(service: impl Into<String>) -> Self {
        Self::BreakerOpen { service: service.into() }
    }

    /// Create a cancelled error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled { operation: operation.into() }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout { operation: operation.into(), elapsed_ms: elapsed.as_millis() as u64 }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if this error should be retried
    ///
    /// Only transient and rate-limit failures are retried. `BreakerOpen`,
    /// `PermissionDenied`, `InvalidPath`, and `NotFound` are terminal for
    /// the call that produced them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultSyncError::Transient { .. } | VaultSyncError::RateLimited { .. })
    }

    /// Check if this error counts as a failure for circuit breaker accounting
    ///
    /// Only service-health failures trip the breaker; a `NotFound` or a
    /// `PermissionDenied` means the service answered.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            VaultSyncError::Transient { .. }
                | VaultSyncError::RateLimited { .. }
                | VaultSyncError::Timeout { .. }
        )
    }

    /// Whether the error is a plan-level failure (exit code 2)
    pub fn is_plan_failure(&self) -> bool {
        matches!(
            self,
            VaultSyncError::CircularTargets { .. }
                | VaultSyncError::Config { .. }
                | VaultSyncError::Validation { .. }
        )
    }
}

impl From<config::ConfigError> for VaultSyncError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for VaultSyncError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

impl From<regex::Error> for VaultSyncError {
    fn from(error: regex::Error) -> Self {
        Self::validation(format!("Invalid regular expression: {}", error))
    }
}

impl From<glob::PatternError> for VaultSyncError {
    fn from(error: glob::PatternError) -> Self {
        Self::validation(format!("Invalid glob pattern: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = VaultSyncError::invalid_path("a/../b", "path contains '..'");
        assert!(matches!(error, VaultSyncError::InvalidPath { .. }));
        assert_eq!(error.to_string(), "Invalid path 'a/../b': path contains '..'");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(VaultSyncError::transient("source.list", "connection reset").is_retryable());
        assert!(VaultSyncError::rate_limited("store.list", None).is_retryable());
        assert!(!VaultSyncError::not_found("app/db").is_retryable());
        assert!(!VaultSyncError::breaker_open("target_store").is_retryable());
        assert!(!VaultSyncError::permission_denied("discovery", "denied").is_retryable());
        assert!(!VaultSyncError::invalid_path("a//b", "empty segment").is_retryable());
    }

    #[test]
    fn test_breaker_accounting() {
        assert!(VaultSyncError::transient("op", "5xx").counts_toward_breaker());
        assert!(VaultSyncError::timeout("op", Duration::from_secs(30)).counts_toward_breaker());
        assert!(!VaultSyncError::not_found("x").counts_toward_breaker());
        assert!(!VaultSyncError::permission_denied("op", "no").counts_toward_breaker());
        assert!(!VaultSyncError::breaker_open("source").counts_toward_breaker());
    }

    #[test]
    fn test_plan_failures() {
        let cycle = VaultSyncError::CircularTargets { remaining: vec!["a".into(), "b".into()] };
        assert!(cycle.is_plan_failure());
        assert!(VaultSyncError::validation("duplicate target name").is_plan_failure());
        assert!(!VaultSyncError::not_found("x").is_plan_failure());
    }

    #[test]
    fn test_error_conversions() {
        let json_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: VaultSyncError = json_error.into();
        assert!(matches!(err, VaultSyncError::Serialization(_)));

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: VaultSyncError = io_error.into();
        assert!(matches!(err, VaultSyncError::Io(_)));
    }
}
