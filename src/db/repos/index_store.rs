use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{error::DbResult, unit_of_work::UnitOfWork},
    models::{
        EntityScope, InstanceIdentifier, PartitionKey, PendingDeletion,
        VersionedInstanceIdentifier,
    },
};

/// Authoritative index of live instances and pending-deletion records.
///
/// The pending-deletion record (and its retry ledger) is owned exclusively by
/// implementations of this trait. Mutations of a single record must be atomic
/// so overlapping reconciliation passes degrade to duplicate blob deletes
/// rather than lost updates.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Add a live instance and assign it a fresh version.
    ///
    /// Versions are strictly increasing and never reused, including across
    /// deletes. Returns `Conflict` if a live instance with the same UIDs exists.
    async fn register_instance(
        &self,
        identifier: InstanceIdentifier,
    ) -> DbResult<VersionedInstanceIdentifier>;

    /// Move every live instance within `scope` in `partition` to the
    /// pending-deletion set with the given `cleanup_after`.
    ///
    /// Returns the number of records written, or `NotFound` if the scope
    /// matched no live instance.
    async fn write_pending_deletion(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
        cleanup_after: DateTime<Utc>,
    ) -> DbResult<u64>;

    /// Up to `batch_size` records with `cleanup_after <= now` and
    /// `retry_count <= max_retries`, oldest `cleanup_after` first.
    async fn discover_due(
        &self,
        batch_size: u32,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<PendingDeletion>>;

    /// Remove a pending-deletion record. Removing an absent record is a no-op.
    async fn purge(
        &self,
        instance: &VersionedInstanceIdentifier,
        cancel: &CancellationToken,
    ) -> DbResult<()>;

    /// Atomically bump `retry_count` and set `cleanup_after`, returning the new count.
    async fn increment_retry(
        &self,
        instance: &VersionedInstanceIdentifier,
        next_cleanup_after: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> DbResult<u32>;

    /// Move records in `scope` that are still inside their grace period
    /// (`cleanup_after > now`, never attempted) back to the live index.
    ///
    /// Records whose UIDs have since been re-registered are left pending.
    async fn restore_pending(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
        now: DateTime<Utc>,
    ) -> DbResult<u64>;

    /// Records excluded from reconciliation under `max_retries`, oldest first.
    async fn list_parked(&self, max_retries: u32, limit: u32) -> DbResult<Vec<PendingDeletion>>;

    /// Clear the retry ledger of one record so it re-enters reconciliation.
    async fn reset_retries(
        &self,
        instance: &VersionedInstanceIdentifier,
        cleanup_after: DateTime<Utc>,
    ) -> DbResult<()>;

    /// Acquire the resource boundary for one reconciliation pass.
    async fn begin_unit_of_work(&self) -> DbResult<UnitOfWork> {
        Ok(UnitOfWork::detached())
    }
}
