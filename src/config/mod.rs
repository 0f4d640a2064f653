//! # Configuration Management
//!
//! Loads the vaultsync configuration from a YAML file with
//! `VAULTSYNC_`-prefixed environment variable overrides, then validates
//! it. External collaborators (CLI flags, credential acquisition) layer on
//! top of the validated [`AppConfig`].

mod settings;

pub use settings::{
    AppConfig, BreakerSettings, ConcurrencyConfig, DefaultsConfig, DiscoveryConfig, DiscoveryKind,
    FilterConfig, MergeStoreConfig, MergeStoreKind, ObservabilityConfig, SourceConfig, TagGlob,
    TagMatchMode, TargetConfig, TargetKind, VersioningConfig, BASE_MERGED,
};

use crate::errors::Result;

/// Convenient alias used by embedders
pub type Config = AppConfig;

/// Load and validate configuration from a file path.
///
/// Environment variables override file values: `VAULTSYNC_DEFAULTS__DRY_RUN`
/// maps to `defaults.dry_run`.
pub fn load_config(path: &str) -> Result<AppConfig> {
    let config: AppConfig = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("VAULTSYNC").separator("__"))
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("vaultsync-config-test.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "sources:\n  - mount: kv\ntargets:\n  - name: prod\n    kind: memory\n"
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.targets[0].name, "prod");

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_config_missing_file_fails() {
        assert!(load_config("/nonexistent/vaultsync.yml").is_err());
    }
}
