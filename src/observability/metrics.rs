//! # Metrics Collection
//!
//! Counters and histograms for the pipeline, emitted through the
//! `metrics` facade. The Prometheus scrape endpoint is an external
//! concern; this module only installs the recorder when enabled and
//! provides the record helpers used throughout the core.

use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::config::ObservabilityConfig;
use crate::errors::{Result, VaultSyncError};

/// Install the Prometheus recorder when metrics are enabled
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| VaultSyncError::config(format!("Failed to install metrics recorder: {}", e)))?;
    info!("Prometheus metrics recorder installed");
    Ok(())
}

/// Record one source listing
pub fn record_source_list(mount: &str, leaves: usize, duration: Duration) {
    let labels = [("mount", mount.to_string())];
    counter!("source_list_total", &labels).increment(1);
    counter!("source_leaves_total", &labels).increment(leaves as u64);
    histogram!("source_list_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Record one source read
pub fn record_source_read(mount: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    let labels = [("mount", mount.to_string()), ("status", status.to_string())];
    counter!("source_reads_total", &labels).increment(1);
    histogram!("source_read_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Record one target store operation
pub fn record_store_operation(target: &str, operation: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    let labels = [
        ("target", target.to_string()),
        ("operation", operation.to_string()),
        ("status", status.to_string()),
    ];
    counter!("target_store_operations_total", &labels).increment(1);

    let duration_labels = [("operation", operation.to_string())];
    histogram!("target_store_operation_duration_seconds", &duration_labels)
        .record(duration.as_secs_f64());
}

/// Record one blob store operation
pub fn record_blob_operation(operation: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    let labels = [("operation", operation.to_string()), ("status", status.to_string())];
    counter!("blob_store_operations_total", &labels).increment(1);
}

/// Record pagination calls made by a store client while exhausting one
/// listing; called by client implementations
pub fn record_pagination(service: &str, pages: u64) {
    let labels = [("service", service.to_string())];
    counter!("pagination_calls_total", &labels).increment(pages);
}

/// Record one discovery pass
pub fn record_discovery(accounts: usize, duration: Duration) {
    counter!("discovery_runs_total").increment(1);
    counter!("discovery_accounts_total").increment(accounts as u64);
    histogram!("discovery_duration_seconds").record(duration.as_secs_f64());
}

/// Record a circuit breaker state transition
pub fn record_breaker_transition(service: &str, to_state: &str) {
    let labels = [("service", service.to_string()), ("to", to_state.to_string())];
    counter!("breaker_transitions_total", &labels).increment(1);
}

/// Record a call rejected by an open breaker
pub fn record_breaker_rejection(service: &str) {
    let labels = [("service", service.to_string())];
    counter!("breaker_rejections_total", &labels).increment(1);
}

/// Record a per-target diff summary
pub fn record_diff(target: &str, added: usize, modified: usize, deleted: usize) {
    let labels = [("target", target.to_string())];
    counter!("diff_added_total", &labels).increment(added as u64);
    counter!("diff_modified_total", &labels).increment(modified as u64);
    counter!("diff_deleted_total", &labels).increment(deleted as u64);
}

/// Record a whole run
pub fn record_run(outcome: &str, duration: Duration) {
    let labels = [("outcome", outcome.to_string())];
    counter!("runs_total", &labels).increment(1);
    histogram!("run_duration_seconds").record(duration.as_secs_f64());
}
