//! Observability module providing logging and metrics.
//!
//! This module initializes and configures:
//! - Structured logging with configurable formats (pretty, compact, JSON)
//! - Prometheus metrics for cleanup passes, per-entity outcomes and scheduling
//!
//! Operational alerts (transient failures, parked records) are emitted as
//! `tracing` events carrying a `severity` field; parked records additionally
//! go to the [`ALERT_TARGET`] target so they can be routed separately.

pub mod metrics;
mod tracing_init;

pub use tracing_init::*;

/// Tracing target for critical, operator-facing alerts.
pub const ALERT_TARGET: &str = "dicom_cleanup::alerts";
