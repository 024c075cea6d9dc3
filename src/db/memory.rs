//! Process-local index store.
//!
//! Used for development runs and tests. All state lives behind one async
//! mutex, so every operation is atomic with respect to the others.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    db::{
        cancellable,
        error::{DbError, DbResult},
        repos::IndexStore,
    },
    models::{
        EntityScope, InstanceIdentifier, PartitionKey, PendingDeletion,
        VersionedInstanceIdentifier,
    },
};

#[derive(Default)]
struct IndexState {
    last_version: i64,
    live: HashMap<InstanceIdentifier, i64>,
    pending: HashMap<VersionedInstanceIdentifier, PendingDeletion>,
}

impl IndexState {
    fn sorted_pending<'a>(
        &'a self,
        filter: impl Fn(&PendingDeletion) -> bool,
    ) -> Vec<&'a PendingDeletion> {
        let mut records: Vec<_> = self.pending.values().filter(|p| filter(p)).collect();
        records.sort_by(|a, b| {
            a.cleanup_after
                .cmp(&b.cleanup_after)
                .then(a.instance.version.cmp(&b.instance.version))
        });
        records
    }
}

#[derive(Default)]
pub struct InMemoryIndexStore {
    state: Mutex<IndexState>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending-deletion record directly, bypassing the live index.
    #[cfg(test)]
    pub async fn insert_pending(&self, record: PendingDeletion) {
        let mut state = self.state.lock().await;
        state.last_version = state.last_version.max(record.instance.version);
        state.pending.insert(record.instance.clone(), record);
    }

    /// Snapshot of a pending-deletion record.
    pub async fn get_pending(&self, id: &VersionedInstanceIdentifier) -> Option<PendingDeletion> {
        self.state.lock().await.pending.get(id).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn live_count(&self) -> usize {
        self.state.lock().await.live.len()
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn register_instance(
        &self,
        identifier: InstanceIdentifier,
    ) -> DbResult<VersionedInstanceIdentifier> {
        let mut state = self.state.lock().await;
        if state.live.contains_key(&identifier) {
            return Err(DbError::Conflict(format!(
                "Instance {} is already registered",
                identifier
            )));
        }
        state.last_version += 1;
        let version = state.last_version;
        state.live.insert(identifier.clone(), version);
        Ok(identifier.with_version(version))
    }

    async fn write_pending_deletion(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
        cleanup_after: DateTime<Utc>,
    ) -> DbResult<u64> {
        let mut state = self.state.lock().await;
        let matched: Vec<InstanceIdentifier> = state
            .live
            .keys()
            .filter(|id| id.partition == partition && scope.contains(id))
            .cloned()
            .collect();

        if matched.is_empty() {
            return Err(DbError::NotFound);
        }

        for identifier in &matched {
            if let Some(version) = state.live.remove(identifier) {
                let versioned = identifier.clone().with_version(version);
                state.pending.insert(
                    versioned.clone(),
                    PendingDeletion::new(versioned, cleanup_after),
                );
            }
        }
        Ok(matched.len() as u64)
    }

    async fn discover_due(
        &self,
        batch_size: u32,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<PendingDeletion>> {
        cancellable(cancel, async {
            let now = Utc::now();
            let state = self.state.lock().await;
            Ok(state
                .sorted_pending(|p| p.is_due(now, max_retries))
                .into_iter()
                .take(batch_size as usize)
                .cloned()
                .collect())
        })
        .await
    }

    async fn purge(
        &self,
        instance: &VersionedInstanceIdentifier,
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        cancellable(cancel, async {
            self.state.lock().await.pending.remove(instance);
            Ok(())
        })
        .await
    }

    async fn increment_retry(
        &self,
        instance: &VersionedInstanceIdentifier,
        next_cleanup_after: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> DbResult<u32> {
        cancellable(cancel, async {
            let mut state = self.state.lock().await;
            let record = state.pending.get_mut(instance).ok_or(DbError::NotFound)?;
            record.retry_count = record.retry_count.saturating_add(1);
            record.cleanup_after = next_cleanup_after;
            Ok(record.retry_count)
        })
        .await
    }

    async fn restore_pending(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let mut state = self.state.lock().await;
        let mut candidates: Vec<VersionedInstanceIdentifier> = state
            .pending
            .values()
            .filter(|p| {
                let id = &p.instance.identifier;
                id.partition == partition
                    && scope.contains(id)
                    && p.cleanup_after > now
                    && p.retry_count == 0
            })
            .map(|p| p.instance.clone())
            .collect();
        // Newest generation first; older ones of the same UIDs stay pending.
        candidates.sort_by(|a, b| b.version.cmp(&a.version));

        let mut restored = 0u64;
        for versioned in candidates {
            if state.live.contains_key(&versioned.identifier) {
                continue;
            }
            state.pending.remove(&versioned);
            state
                .live
                .insert(versioned.identifier.clone(), versioned.version);
            restored += 1;
        }
        Ok(restored)
    }

    async fn list_parked(&self, max_retries: u32, limit: u32) -> DbResult<Vec<PendingDeletion>> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_pending(|p| p.is_parked(max_retries))
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn reset_retries(
        &self,
        instance: &VersionedInstanceIdentifier,
        cleanup_after: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let record = state.pending.get_mut(instance).ok_or(DbError::NotFound)?;
        record.retry_count = 0;
        record.cleanup_after = cleanup_after;
        Ok(())
    }
}
