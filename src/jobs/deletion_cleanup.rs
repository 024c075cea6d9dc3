//! Deletion cleanup worker.
//!
//! Runs reconciliation passes on a fixed interval until shutdown. When a pass
//! discovers a full batch and completes cleanly, the next pass starts right
//! away so a backlog drains without waiting out the interval.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::CleanupConfig,
    deletion::{CleanupPassResult, CleanupReconciler},
};

/// Start the deletion cleanup worker.
///
/// Returns when `shutdown` fires, or immediately if cleanup is disabled. The
/// shutdown token is also handed to each pass, so an in-flight pass stops
/// between records.
pub async fn start_deletion_cleanup_worker(
    reconciler: Arc<CleanupReconciler>,
    config: CleanupConfig,
    shutdown: CancellationToken,
) {
    if !config.enabled {
        tracing::info!("Deletion cleanup worker disabled by configuration");
        return;
    }

    let dry_run_msg = if reconciler.is_dry_run() {
        " (DRY RUN)"
    } else {
        ""
    };

    tracing::info!(
        interval_secs = config.interval_secs,
        batch_size = config.batch_size,
        max_retries = config.max_retries,
        retry_backoff_secs = config.retry_backoff_secs,
        dry_run = reconciler.is_dry_run(),
        "Starting deletion cleanup worker{}",
        dry_run_msg
    );

    let interval = config.interval();

    loop {
        let result = reconciler
            .run_cleanup_pass(
                config.batch_size,
                config.max_retries,
                config.retry_backoff(),
                &shutdown,
            )
            .await;
        log_pass(&result, dry_run_msg);

        if shutdown.is_cancelled() {
            break;
        }

        // Dry runs never shrink the backlog, so re-running would spin.
        if result.success && result.is_saturated(config.batch_size) && !reconciler.is_dry_run() {
            tracing::debug!(
                discovered = result.discovered,
                "Batch was full; starting next cleanup pass immediately"
            );
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("Deletion cleanup worker stopped");
}

fn log_pass(result: &CleanupPassResult, dry_run_msg: &str) {
    if result.cancelled {
        tracing::info!(
            discovered = result.discovered,
            purged = result.purged,
            duration_ms = result.duration_ms,
            "Deletion cleanup pass cancelled"
        );
    } else if !result.success {
        tracing::warn!(
            discovered = result.discovered,
            purged = result.purged,
            retried = result.retried,
            parked = result.parked,
            retry_failures = result.retry_failures,
            duration_ms = result.duration_ms,
            "Deletion cleanup pass completed with failures"
        );
    } else if result.discovered > 0 {
        tracing::info!(
            discovered = result.discovered,
            purged = result.purged,
            retried = result.retried,
            parked = result.parked,
            duration_ms = result.duration_ms,
            "Deletion cleanup pass complete{}",
            dry_run_msg
        );
    } else {
        tracing::debug!("Deletion cleanup pass complete, nothing to clean up");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::deletion::test_support::Harness;

    fn config(batch_size: u32) -> CleanupConfig {
        CleanupConfig {
            enabled: true,
            interval_secs: 3600,
            batch_size,
            max_retries: 3,
            retry_backoff_secs: 60,
            ..CleanupConfig::default()
        }
    }

    fn reconciler(h: &Harness) -> Arc<CleanupReconciler> {
        Arc::new(CleanupReconciler::new(
            h.index.clone(),
            h.metadata.clone(),
            h.files.clone(),
        ))
    }

    #[tokio::test]
    async fn test_disabled_worker_returns_immediately() {
        let h = Harness::new();
        h.pending("1.1.1", chrono::Duration::minutes(-1)).await;
        let config = CleanupConfig {
            enabled: false,
            ..config(10)
        };

        tokio::time::timeout(
            Duration::from_secs(1),
            start_deletion_cleanup_worker(reconciler(&h), config, CancellationToken::new()),
        )
        .await
        .expect("disabled worker should return");

        assert_eq!(h.index.inner.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_saturated_batches_drain_without_waiting() {
        let h = Harness::new();
        for sop in ["1.1.1", "1.1.2", "1.1.3", "1.1.4", "1.1.5"] {
            h.pending(sop, chrono::Duration::minutes(-1)).await;
        }
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(start_deletion_cleanup_worker(
            reconciler(&h),
            config(2),
            shutdown.clone(),
        ));

        // The interval is an hour, so only back-to-back passes can drain this.
        for _ in 0..200 {
            if h.index.inner.pending_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.index.inner.pending_count().await, 0);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let h = Harness::new();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(start_deletion_cleanup_worker(
            reconciler(&h),
            config(10),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_pass_waits_for_interval() {
        let h = Harness::new();
        for sop in ["1.1.1", "1.1.2"] {
            h.pending(sop, chrono::Duration::minutes(-1)).await;
        }
        h.index.fail_discovery();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(start_deletion_cleanup_worker(
            reconciler(&h),
            config(2),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let discoveries = h
            .log
            .count(|c| matches!(c, crate::deletion::test_support::Call::Discover));
        assert_eq!(discoveries, 1);

        shutdown.cancel();
        worker.await.unwrap();
    }
}
