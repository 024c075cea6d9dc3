//! Background job infrastructure for the cleanup service.
//!
//! - **Deletion Cleanup**: Reconciles pending deletions on a fixed interval,
//!   removing blobs and index records and parking records that keep failing.
//!
//! The job here only schedules work. A single pass is
//! [`crate::deletion::CleanupReconciler::run_cleanup_pass`], which returns a
//! [`crate::deletion::CleanupPassResult`] and records pass metrics itself.
//! The worker owns the interval loop, logs each result and stops on the
//! shutdown token. Its settings come from `[cleanup]` (`config/cleanup.rs`).
//!
//! # Example
//!
//! ```toml
//! [cleanup]
//! enabled = true
//! interval_secs = 60
//! batch_size = 100
//! ```

mod deletion_cleanup;

pub use deletion_cleanup::start_deletion_cleanup_worker;
