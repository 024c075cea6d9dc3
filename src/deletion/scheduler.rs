use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{info, instrument};

use crate::{
    db::{DbError, DbResult, IndexStore},
    models::{EntityScope, InstanceIdentifier, PartitionKey},
    observability::metrics,
};

/// Turns delete requests into pending-deletion records.
///
/// The scheduler never touches blob stores. It only moves live index entries
/// into the pending set with a `cleanup_after` timestamp; the reconciler does
/// the physical work later.
#[derive(Clone)]
pub struct DeletionScheduler {
    index: Arc<dyn IndexStore>,
    delete_delay: Duration,
}

impl DeletionScheduler {
    pub fn new(index: Arc<dyn IndexStore>, delete_delay: Duration) -> Self {
        Self {
            index,
            delete_delay,
        }
    }

    /// Grace period applied by [`Self::schedule_deferred_deletion`].
    pub fn delete_delay(&self) -> Duration {
        self.delete_delay
    }

    /// Schedule every live instance in `scope` for cleanup `delay` from now.
    ///
    /// Returns the number of pending-deletion records written. Index errors
    /// (including `NotFound` for an empty scope) propagate unchanged.
    #[instrument(skip(self, scope), fields(scope = %scope))]
    pub async fn schedule_deletion(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
        delay: Duration,
    ) -> DbResult<u64> {
        let out_of_range = || DbError::Internal(format!("deletion delay {delay:?} out of range"));
        let delay = chrono::Duration::from_std(delay).map_err(|_| out_of_range())?;
        let cleanup_after = Utc::now()
            .checked_add_signed(delay)
            .ok_or_else(out_of_range)?;

        let count = self
            .index
            .write_pending_deletion(partition, scope, cleanup_after)
            .await?;

        let immediate = delay.is_zero();
        metrics::record_deletion_scheduled(count, immediate);
        info!(
            partition = %partition,
            level = scope.level(),
            count,
            cleanup_after = %cleanup_after,
            immediate,
            "Scheduled deletion"
        );
        Ok(count)
    }

    /// Soft delete: schedule `scope` after the configured grace period.
    pub async fn schedule_deferred_deletion(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
    ) -> DbResult<u64> {
        self.schedule_deletion(partition, scope, self.delete_delay)
            .await
    }

    /// Hard delete: the instance becomes eligible on the next pass.
    pub async fn schedule_immediate_deletion(
        &self,
        identifier: &InstanceIdentifier,
    ) -> DbResult<u64> {
        self.schedule_deletion(identifier.partition, &identifier.as_scope(), Duration::ZERO)
            .await
    }

    /// Undo a deferred deletion that is still inside its grace period.
    ///
    /// Returns `NotFound` when nothing in `scope` could be restored.
    #[instrument(skip(self, scope), fields(scope = %scope))]
    pub async fn restore_scheduled_deletion(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
    ) -> DbResult<u64> {
        let restored = self
            .index
            .restore_pending(partition, scope, Utc::now())
            .await?;
        if restored == 0 {
            return Err(DbError::NotFound);
        }

        info!(
            partition = %partition,
            level = scope.level(),
            restored,
            "Restored scheduled deletion"
        );
        Ok(restored)
    }
}
