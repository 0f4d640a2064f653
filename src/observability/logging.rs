//! # Structured Logging
//!
//! Provides structured logging setup using the tracing ecosystem.

use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt::{self, format::JsonFields},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::ObservabilityConfig;
use crate::errors::{Result, VaultSyncError};

static LOGGING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Initialize structured logging based on configuration
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = parse_env_filter(&config.log_level)?;

    LOGGING_INITIALIZED.get_or_try_init(|| configure_logging(config, env_filter)).map(|_| ())
}

fn configure_logging(config: &ObservabilityConfig, env_filter: EnvFilter) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_logging {
        // JSON structured logging for production
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .fmt_fields(JsonFields::new());

        registry
            .with(json_layer)
            .try_init()
            .map_err(|e| VaultSyncError::config(format!("Failed to initialize logging: {}", e)))?;
    } else {
        // Human-readable logging for development
        let pretty_layer = fmt::layer().with_target(true).with_thread_ids(false);

        registry
            .with(pretty_layer)
            .try_init()
            .map_err(|e| VaultSyncError::config(format!("Failed to initialize logging: {}", e)))?;
    }

    Ok(())
}

fn parse_env_filter(level: &str) -> Result<EnvFilter> {
    let normalized = level.trim();
    let lower = normalized.to_ascii_lowercase();

    match lower.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(VaultSyncError::config(format!(
                "Invalid log level '{}': must be one of trace, debug, info, warn, error",
                level
            )));
        }
    }

    EnvFilter::try_new(normalized)
        .map_err(|e| VaultSyncError::config(format!("Invalid log level '{}': {}", level, e)))
}
