//! Prometheus metrics for the cleanup service.
//!
//! Provides metrics for:
//! - Reconciliation passes (count, success, discovered records, duration)
//! - Per-entity reconciliation outcomes
//! - Deletion scheduling
//! - Unit-of-work boundaries

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Initialize the metrics system with the given configuration.
///
/// Installs the global recorder, plus a scrape listener when
/// `[observability.metrics.prometheus]` is configured and enabled. The
/// listener is spawned on the current tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.duration_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    match &config.prometheus {
        Some(prometheus) if prometheus.enabled => {
            tracing::info!(listen = %prometheus.listen, "Starting Prometheus scrape listener");
            builder.with_http_listener(prometheus.listen).install()?;
        }
        _ => {
            builder.install_recorder()?;
        }
    }

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled && config.prometheus.is_some() {
        tracing::warn!(
            "Prometheus metrics are configured but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a completed (or aborted) reconciliation pass.
///
/// # Arguments
/// * `success` - The pass's aggregate success flag
/// * `discovered` - Number of records returned by discovery
/// * `duration_secs` - Wall-clock time of the pass
pub fn record_cleanup_pass(success: bool, discovered: usize, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "failure" };
        counter!("deletion_cleanup_passes_total", "status" => status).increment(1);
        gauge!("deletion_cleanup_last_discovered").set(discovered as f64);
        histogram!("deletion_cleanup_pass_duration_seconds", "status" => status)
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (success, discovered, duration_secs);
    }
}

/// Record the outcome of reconciling one pending-deletion record.
///
/// # Arguments
/// * `outcome` - One of "purged", "retry_scheduled", "parked",
///   "retry_failed", "would_delete"
pub fn record_cleanup_entity(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "deletion_cleanup_entities_total",
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record a failed physical or index delete for one record.
///
/// # Arguments
/// * `store` - Which store failed ("file", "metadata", "index")
pub fn record_cleanup_error(store: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "deletion_cleanup_errors_total",
            "store" => store.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = store;
    }
}

/// Record pending-deletion records written by the scheduler.
pub fn record_deletion_scheduled(count: u64, immediate: bool) {
    #[cfg(feature = "prometheus")]
    {
        let mode = if immediate { "immediate" } else { "deferred" };
        counter!("deletions_scheduled_total", "mode" => mode).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (count, immediate);
    }
}

/// Record the release of a pass's unit of work.
pub fn record_unit_of_work(committed: bool) {
    #[cfg(feature = "prometheus")]
    {
        let state = if committed { "committed" } else { "abandoned" };
        counter!("deletion_cleanup_units_of_work_total", "state" => state).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = committed;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        record_cleanup_pass(true, 3, 0.25);
        record_cleanup_entity("purged");
        record_cleanup_error("file");
        record_deletion_scheduled(2, false);
        record_unit_of_work(true);
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_seconds_from_ms() {
        assert_eq!(seconds_from_ms(&[10.0, 2500.0]), vec![0.01, 2.5]);
    }
}
