//! # Configuration Settings
//!
//! Defines the configuration structure for the vaultsync pipeline.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::breaker::BreakerConfig;
use crate::diff::DiffFormat;
use crate::errors::{Result, VaultSyncError};
use crate::merge::SecretTree;

/// Reserved import name referring to the merge-phase output
pub const BASE_MERGED: &str = "base_merged";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Hierarchical secret sources, read and merged in order
    #[validate(nested)]
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Blob store for persisted per-target merged outputs
    #[validate(nested)]
    #[serde(default)]
    pub merge_store: MergeStoreConfig,

    /// Sync targets
    #[validate(nested)]
    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    /// Dynamic account discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Circuit breaker tuning
    #[validate(nested)]
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,

    /// Fan-out widths
    #[validate(nested)]
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Run defaults
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Logging and metrics
    #[validate(nested)]
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(VaultSyncError::from)?;
        self.validate_custom()
    }

    /// Cross-field validation beyond what the validator derive covers
    fn validate_custom(&self) -> Result<()> {
        let mut names: Vec<&str> = Vec::new();
        for target in &self.targets {
            if target.name == BASE_MERGED {
                return Err(VaultSyncError::validation(format!(
                    "'{}' is a reserved import name and cannot be used as a target name",
                    BASE_MERGED
                )));
            }
            if names.contains(&target.name.as_str()) {
                return Err(VaultSyncError::validation(format!(
                    "Duplicate target name '{}'",
                    target.name
                )));
            }
            names.push(&target.name);
        }

        for target in &self.targets {
            for import in &target.imports {
                if import == BASE_MERGED {
                    continue;
                }
                if import == &target.name {
                    return Err(VaultSyncError::validation(format!(
                        "Target '{}' imports itself",
                        target.name
                    )));
                }
                if !names.contains(&import.as_str()) {
                    return Err(VaultSyncError::validation(format!(
                        "Target '{}' imports unknown target '{}'",
                        target.name, import
                    )));
                }
                if !self.merge_store.enabled {
                    return Err(VaultSyncError::validation(format!(
                        "Target '{}' imports '{}' but the merge store is disabled",
                        target.name, import
                    )));
                }
            }

            if !target.overrides.is_empty_mapping() && target.overrides.as_mapping().is_none() {
                return Err(VaultSyncError::validation(format!(
                    "Target '{}' overrides must be a mapping of path to value",
                    target.name
                )));
            }

            if let Some(filters) = &target.filters {
                if let Some(pattern) = &filters.path_regex {
                    regex::Regex::new(pattern)?;
                }
                if let Some(pattern) = &filters.exclude_regex {
                    regex::Regex::new(pattern)?;
                }
                if let Some(tag_match) = &filters.tag_match {
                    for (key, value) in tag_match {
                        glob::Pattern::new(key)?;
                        glob::Pattern::new(value)?;
                    }
                }
            }
        }

        if self.discovery.enabled {
            for tag_glob in &self.discovery.tag_globs {
                glob::Pattern::new(&tag_glob.key)?;
                glob::Pattern::new(&tag_glob.value)?;
            }
            if self.discovery.root_ou.is_none() && self.discovery.tag_globs.is_empty() {
                return Err(VaultSyncError::validation(
                    "discovery requires a root OU or at least one tag pattern",
                ));
            }
        }

        Ok(())
    }
}

fn default_max_secrets() -> usize {
    10_000
}

fn default_compaction_threshold() -> usize {
    1_024
}

/// One hierarchical secret source
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    /// Mount path of the KV namespace
    #[validate(length(min = 1, message = "Mount cannot be empty"))]
    pub mount: String,

    /// Upper bound on leaves accumulated per listing
    #[validate(range(min = 1, message = "max_secrets must be at least 1"))]
    #[serde(default = "default_max_secrets")]
    pub max_secrets: usize,

    /// Pending-queue length that triggers in-place compaction
    #[validate(range(min = 1, message = "queue_compaction_threshold must be at least 1"))]
    #[serde(default = "default_compaction_threshold")]
    pub queue_compaction_threshold: usize,
}

/// Blob merge store backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStoreKind {
    #[default]
    Memory,
    ObjectStore,
}

fn default_prefix() -> String {
    "merge-state".to_string()
}

/// Blob merge store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MergeStoreConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub kind: MergeStoreKind,

    /// Bucket or endpoint, backend-specific
    #[serde(default)]
    pub location: String,

    /// Key prefix for persisted bundles
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for MergeStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: MergeStoreKind::Memory,
            location: String::new(),
            prefix: default_prefix(),
        }
    }
}

/// Secret store backend kind for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    CloudSecretStore,
    Memory,
}

/// Record filters applied per target
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilterConfig {
    /// Keep only paths matching this pattern
    pub path_regex: Option<String>,
    /// Drop paths matching this pattern
    pub exclude_regex: Option<String>,
    /// Keep only store records whose tags match these glob pairs
    pub tag_match: Option<HashMap<String, String>>,
}

fn default_retain() -> u32 {
    5
}

/// Versioning behavior for a target
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VersioningConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Versions retained per record
    #[validate(range(min = 1, message = "retain must be at least 1"))]
    #[serde(default = "default_retain")]
    pub retain: u32,
}

/// One sync target
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TargetConfig {
    /// Unique target name; may carry `{account_id}`/`{account_name}`
    /// placeholders when discovery expansion is enabled
    #[validate(length(min = 1, message = "Target name cannot be empty"))]
    pub name: String,

    #[serde(default)]
    pub kind: TargetKind,

    pub region: Option<String>,

    /// Role assumed when talking to this target's backend; opaque to the core
    pub role: Option<String>,

    /// Upstream targets (or `base_merged`) folded into this target's bundle
    #[serde(default)]
    pub imports: Vec<String>,

    /// Path -> value overlays merged last
    #[serde(default = "SecretTree::empty_mapping")]
    pub overrides: SecretTree,

    pub filters: Option<FilterConfig>,

    #[validate(nested)]
    pub versioning: Option<VersioningConfig>,
}

impl TargetConfig {
    /// A target with defaults for everything but the name (tests, expansion)
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TargetKind::default(),
            region: None,
            role: None,
            imports: Vec::new(),
            overrides: SecretTree::empty_mapping(),
            filters: None,
            versioning: None,
        }
    }
}

/// Discovery backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryKind {
    #[default]
    Organizations,
    IdentityCenter,
}

/// One tag glob pair; `*` and `?` wildcards apply to key and value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagGlob {
    pub key: String,
    pub value: String,
}

/// Conjunctive or disjunctive combination across tag globs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TagMatchMode {
    #[default]
    And,
    Or,
}

/// Account discovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub kind: DiscoveryKind,

    pub root_ou: Option<String>,

    /// Traverse child OUs depth-first
    #[serde(default)]
    pub recursive: bool,

    #[serde(default)]
    pub tag_globs: Vec<TagGlob>,

    #[serde(default)]
    pub and_or: TagMatchMode,

    /// Accepted account statuses; empty accepts all
    #[serde(default)]
    pub status_in: Vec<String>,

    /// Role assumed in discovered accounts; opaque to the core
    pub role: Option<String>,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    10
}

fn default_reset_timeout_secs() -> u64 {
    30
}

fn default_max_probes() -> u32 {
    1
}

/// Circuit breaker settings (shared by all four service breakers)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BreakerSettings {
    #[validate(range(min = 1, message = "failure_threshold must be at least 1"))]
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,

    #[validate(range(min = 1, message = "max_probes must be at least 1"))]
    #[serde(default = "default_max_probes")]
    pub max_probes: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            reset_timeout_secs: default_reset_timeout_secs(),
            max_probes: default_max_probes(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            window: Duration::from_secs(self.window_secs),
            reset_timeout: Duration::from_secs(self.reset_timeout_secs),
            max_probes: self.max_probes,
        }
    }
}

fn default_width() -> usize {
    10
}

/// Fan-out widths for the executor's semaphores
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConcurrencyConfig {
    /// Concurrent reads per source during the merge phase
    #[validate(range(min = 1, message = "w_source must be at least 1"))]
    #[serde(default = "default_width")]
    pub w_source: usize,

    /// Concurrent targets within a plan level during the sync phase
    #[validate(range(min = 1, message = "w_target must be at least 1"))]
    #[serde(default = "default_width")]
    pub w_target: usize,

    /// Concurrent per-entry applies within a target; sequential when unset
    pub w_entry: Option<usize>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { w_source: default_width(), w_target: default_width(), w_entry: None }
    }
}

fn default_per_call_timeout_secs() -> u64 {
    30
}

/// Run defaults (overridable from the CLI)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub dry_run: bool,

    /// Render diffs during sync
    #[serde(default)]
    pub diff: bool,

    #[serde(default)]
    pub output_format: DiffFormat,

    /// Disable diff value masking
    #[serde(default)]
    pub show_values: bool,

    /// Omit and never create records whose value is an empty mapping
    #[serde(default)]
    pub no_empty_secrets: bool,

    #[serde(default = "default_per_call_timeout_secs")]
    pub per_call_timeout_secs: u64,

    /// Whole-run timeout; unbounded when unset
    pub run_timeout_secs: Option<u64>,

    /// Node budget for deep merges; unlimited when unset
    pub merge_node_limit: Option<usize>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            diff: false,
            output_format: DiffFormat::default(),
            show_values: false,
            no_empty_secrets: false,
            per_call_timeout_secs: default_per_call_timeout_secs(),
            run_timeout_secs: None,
            merge_node_limit: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON logs for production, pretty logs for development
    #[serde(default)]
    pub json_logging: bool,

    #[serde(default)]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), json_logging: false, metrics_enabled: false }
    }
}
