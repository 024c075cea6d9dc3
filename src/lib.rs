//! Deferred deletion scheduling and cleanup reconciliation for DICOM storage.
//!
//! Deleting a study, series or instance first moves its index entries into a
//! pending-deletion set. A background reconciler later removes the file and
//! metadata blobs for each pending record and purges the record once both
//! blobs are gone, retrying failures and parking records that keep failing.

pub mod config;
pub mod db;
pub mod deletion;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod storage;

pub use config::CleanupServiceConfig;
pub use deletion::{CleanupPassResult, CleanupReconciler, DeletionScheduler};
