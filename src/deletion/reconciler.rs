use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    db::{DbError, IndexStore},
    models::PendingDeletion,
    observability::{ALERT_TARGET, metrics},
    storage::{BlobStore, BlobStoreError},
};

/// Result of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupPassResult {
    /// False if discovery failed, any retry increment failed, or the pass
    /// was cancelled. Individual entity cleanup failures do not clear it.
    pub success: bool,
    /// Records returned by discovery.
    pub discovered: usize,
    /// Records fully cleaned up and removed from the index.
    pub purged: usize,
    /// Records that failed and were rescheduled.
    pub retried: usize,
    /// Records that failed and crossed the retry limit.
    pub parked: usize,
    /// Records whose failure could not be recorded in the retry ledger.
    pub retry_failures: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl CleanupPassResult {
    /// Discovery returned a full batch, so more due records likely remain.
    pub fn is_saturated(&self, batch_size: u32) -> bool {
        self.discovered > 0 && self.discovered >= batch_size as usize
    }

    /// Check if anything was removed or rescheduled.
    pub fn has_deletions(&self) -> bool {
        self.purged > 0 || self.retried > 0 || self.parked > 0
    }

    fn aborted(cancelled: bool) -> Self {
        Self {
            success: false,
            cancelled,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityOutcome {
    Purged,
    RetryScheduled,
    Parked,
    RetryFailed,
    Cancelled,
}

impl EntityOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            EntityOutcome::Purged => "purged",
            EntityOutcome::RetryScheduled => "retry_scheduled",
            EntityOutcome::Parked => "parked",
            EntityOutcome::RetryFailed => "retry_failed",
            EntityOutcome::Cancelled => "cancelled",
        }
    }
}

/// Drives pending deletions to completion.
///
/// Each pass discovers due records and, for each one, deletes its file and
/// metadata blobs concurrently. The index record is purged only after both
/// deletes succeed; any failure bumps the record's retry count instead, and a
/// record whose count passes `max_retries` is parked with a critical alert.
pub struct CleanupReconciler {
    index: Arc<dyn IndexStore>,
    metadata: Arc<dyn BlobStore>,
    files: Arc<dyn BlobStore>,
    dry_run: bool,
}

impl CleanupReconciler {
    pub fn new(
        index: Arc<dyn IndexStore>,
        metadata: Arc<dyn BlobStore>,
        files: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            index,
            metadata,
            files,
            dry_run: false,
        }
    }

    /// Log what would be deleted without touching any store.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run one reconciliation pass.
    ///
    /// Never returns an error: every failure is folded into the result and
    /// logged. Records are processed one at a time in discovery order; a
    /// failure on one record never prevents processing of the next.
    pub async fn run_cleanup_pass(
        &self,
        batch_size: u32,
        max_retries: u32,
        retry_backoff: Duration,
        cancel: &CancellationToken,
    ) -> CleanupPassResult {
        let start = std::time::Instant::now();
        let mut result = self
            .run_pass_inner(batch_size, max_retries, retry_backoff, cancel)
            .await;
        result.duration_ms = start.elapsed().as_millis() as u64;

        metrics::record_cleanup_pass(
            result.success,
            result.discovered,
            start.elapsed().as_secs_f64(),
        );
        result
    }

    async fn run_pass_inner(
        &self,
        batch_size: u32,
        max_retries: u32,
        retry_backoff: Duration,
        cancel: &CancellationToken,
    ) -> CleanupPassResult {
        let unit_of_work = match self.index.begin_unit_of_work().await {
            Ok(unit_of_work) => unit_of_work,
            Err(e) => {
                error!(
                    severity = "error",
                    backend = self.index.backend_name(),
                    error = %e,
                    "Failed to acquire unit of work; skipping cleanup pass"
                );
                return CleanupPassResult::aborted(matches!(e, DbError::Cancelled));
            }
        };

        let due = match self
            .index
            .discover_due(batch_size, max_retries, cancel)
            .await
        {
            Ok(due) => due,
            Err(DbError::Cancelled) => {
                info!("Cleanup pass cancelled before discovery completed");
                return CleanupPassResult::aborted(true);
            }
            Err(e) => {
                error!(
                    severity = "error",
                    backend = self.index.backend_name(),
                    error = %e,
                    "Failed to discover pending deletions"
                );
                return CleanupPassResult::aborted(false);
            }
        };

        let mut result = CleanupPassResult {
            success: true,
            discovered: due.len(),
            ..Default::default()
        };

        if due.is_empty() {
            debug!("No pending deletions due");
            unit_of_work.commit();
            return result;
        }

        info!(
            unit_of_work = %unit_of_work.id(),
            count = due.len(),
            batch_size,
            dry_run = self.dry_run,
            "Reconciling pending deletions"
        );

        if self.dry_run {
            for pending in &due {
                info!(
                    instance = %pending.instance,
                    retry_count = pending.retry_count,
                    cleanup_after = %pending.cleanup_after,
                    "DRY RUN: Would delete instance blobs and index record"
                );
                metrics::record_cleanup_entity("would_delete");
            }
            unit_of_work.commit();
            return result;
        }

        let backoff = chrono::Duration::from_std(retry_backoff).unwrap_or(chrono::Duration::MAX);

        for pending in &due {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let outcome = self
                .reconcile_one(pending, max_retries, backoff, cancel)
                .await;
            if outcome != EntityOutcome::Cancelled {
                metrics::record_cleanup_entity(outcome.as_str());
            }
            match outcome {
                EntityOutcome::Purged => result.purged += 1,
                EntityOutcome::RetryScheduled => result.retried += 1,
                EntityOutcome::Parked => result.parked += 1,
                EntityOutcome::RetryFailed => {
                    result.retry_failures += 1;
                    result.success = false;
                }
                EntityOutcome::Cancelled => {
                    result.cancelled = true;
                    break;
                }
            }
        }

        if result.cancelled {
            result.success = false;
            info!(
                purged = result.purged,
                retried = result.retried,
                parked = result.parked,
                "Cleanup pass cancelled; remaining records left for the next pass"
            );
            // Dropping the unit of work uncommitted records the abandoned pass.
            drop(unit_of_work);
        } else {
            unit_of_work.commit();
        }

        result
    }

    /// Clean up one record: delete both blobs, then purge or record a retry.
    async fn reconcile_one(
        &self,
        pending: &PendingDeletion,
        max_retries: u32,
        backoff: chrono::Duration,
        cancel: &CancellationToken,
    ) -> EntityOutcome {
        let id = &pending.instance;

        let (file_result, metadata_result) = tokio::join!(
            self.files.delete_if_exists(id, cancel),
            self.metadata.delete_if_exists(id, cancel),
        );

        if matches!(file_result, Err(BlobStoreError::Cancelled))
            || matches!(metadata_result, Err(BlobStoreError::Cancelled))
        {
            return EntityOutcome::Cancelled;
        }

        let mut failed = false;
        for (store, outcome) in [("file", file_result), ("metadata", metadata_result)] {
            if let Err(e) = outcome {
                failed = true;
                error!(
                    severity = "error",
                    instance = %id,
                    retry_count = pending.retry_count,
                    store,
                    error = %e,
                    "Failed to delete instance blob"
                );
                metrics::record_cleanup_error(store);
            }
        }

        if !failed {
            match self.index.purge(id, cancel).await {
                Ok(()) => {
                    debug!(instance = %id, "Pending deletion purged");
                    return EntityOutcome::Purged;
                }
                Err(DbError::Cancelled) => return EntityOutcome::Cancelled,
                Err(e) => {
                    error!(
                        severity = "error",
                        instance = %id,
                        retry_count = pending.retry_count,
                        store = "index",
                        error = %e,
                        "Failed to purge pending deletion record"
                    );
                    metrics::record_cleanup_error("index");
                }
            }
        }

        self.schedule_retry(pending, max_retries, backoff, cancel)
            .await
    }

    async fn schedule_retry(
        &self,
        pending: &PendingDeletion,
        max_retries: u32,
        backoff: chrono::Duration,
        cancel: &CancellationToken,
    ) -> EntityOutcome {
        let id = &pending.instance;
        let next_attempt = next_attempt_at(Utc::now(), backoff);

        match self.index.increment_retry(id, next_attempt, cancel).await {
            Ok(retry_count) if retry_count > max_retries => {
                error!(
                    target: ALERT_TARGET,
                    severity = "critical",
                    instance = %id,
                    retry_count,
                    max_retries,
                    "Pending deletion exceeded retry limit and is parked; manual intervention required"
                );
                EntityOutcome::Parked
            }
            Ok(retry_count) => {
                warn!(
                    instance = %id,
                    retry_count,
                    next_attempt = %next_attempt,
                    "Scheduled cleanup retry"
                );
                EntityOutcome::RetryScheduled
            }
            Err(DbError::Cancelled) => EntityOutcome::Cancelled,
            Err(e) => {
                error!(
                    severity = "error",
                    instance = %id,
                    retry_count = pending.retry_count,
                    error = %e,
                    "Failed to record cleanup retry"
                );
                metrics::record_cleanup_error("retry_ledger");
                EntityOutcome::RetryFailed
            }
        }
    }
}

fn next_attempt_at(now: DateTime<Utc>, backoff: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(backoff)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
