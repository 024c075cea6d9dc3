//! Fault-injecting store doubles for reconciler tests.
//!
//! Every store shares one [`CallLog`] so tests can assert cross-store
//! ordering, e.g. that a purge only follows successful blob deletes.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{DbError, DbResult, IndexStore, UnitOfWork, memory::InMemoryIndexStore},
    models::{
        EntityScope, InstanceIdentifier, PartitionKey, PendingDeletion,
        VersionedInstanceIdentifier,
    },
    storage::{BlobKind, BlobStore, BlobStoreError, BlobStoreResult, InMemoryBlobStore},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    BeginUnitOfWork,
    Discover,
    BlobDelete {
        kind: BlobKind,
        id: VersionedInstanceIdentifier,
        ok: bool,
    },
    Purge {
        id: VersionedInstanceIdentifier,
        ok: bool,
    },
    Increment {
        id: VersionedInstanceIdentifier,
        ok: bool,
    },
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Whether anything other than unit-of-work setup and discovery happened.
    pub fn has_entity_calls(&self) -> bool {
        self.calls()
            .iter()
            .any(|c| !matches!(c, Call::BeginUnitOfWork | Call::Discover))
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

/// Blob store that fails deletes for chosen identifiers.
pub struct FlakyBlobStore {
    inner: InMemoryBlobStore,
    log: CallLog,
    failing: Mutex<HashSet<VersionedInstanceIdentifier>>,
}

impl FlakyBlobStore {
    pub fn new(kind: BlobKind, log: CallLog) -> Self {
        Self {
            inner: InMemoryBlobStore::new(kind),
            log,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_for(&self, id: &VersionedInstanceIdentifier) {
        self.failing.lock().unwrap().insert(id.clone());
    }

    pub fn heal(&self, id: &VersionedInstanceIdentifier) {
        self.failing.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, id: &VersionedInstanceIdentifier, content: &[u8]) -> BlobStoreResult<()> {
        self.inner.put(id, content).await
    }

    async fn delete_if_exists(
        &self,
        id: &VersionedInstanceIdentifier,
        cancel: &CancellationToken,
    ) -> BlobStoreResult<()> {
        let fail = self.failing.lock().unwrap().contains(id);
        let result = if fail {
            Err(BlobStoreError::Unavailable(format!(
                "{} store rejected delete",
                self.inner.kind()
            )))
        } else {
            self.inner.delete_if_exists(id, cancel).await
        };
        self.log.push(Call::BlobDelete {
            kind: self.inner.kind(),
            id: id.clone(),
            ok: result.is_ok(),
        });
        result
    }

    async fn exists(&self, id: &VersionedInstanceIdentifier) -> BlobStoreResult<bool> {
        self.inner.exists(id).await
    }

    fn kind(&self) -> BlobKind {
        self.inner.kind()
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// Index store wrapper that can fail discovery, purges and retry increments.
pub struct FlakyIndexStore {
    pub inner: InMemoryIndexStore,
    log: CallLog,
    discover_fails: Mutex<bool>,
    failing_purges: Mutex<HashSet<VersionedInstanceIdentifier>>,
    failing_increments: Mutex<HashSet<VersionedInstanceIdentifier>>,
    cancel_after_discover: Mutex<Option<CancellationToken>>,
}

impl FlakyIndexStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: InMemoryIndexStore::new(),
            log,
            discover_fails: Mutex::new(false),
            failing_purges: Mutex::new(HashSet::new()),
            failing_increments: Mutex::new(HashSet::new()),
            cancel_after_discover: Mutex::new(None),
        }
    }

    pub fn fail_discovery(&self) {
        *self.discover_fails.lock().unwrap() = true;
    }

    pub fn fail_purge_for(&self, id: &VersionedInstanceIdentifier) {
        self.failing_purges.lock().unwrap().insert(id.clone());
    }

    pub fn fail_increment_for(&self, id: &VersionedInstanceIdentifier) {
        self.failing_increments.lock().unwrap().insert(id.clone());
    }

    /// Fire `cancel` as soon as discovery returns.
    pub fn cancel_after_discover(&self, cancel: CancellationToken) {
        *self.cancel_after_discover.lock().unwrap() = Some(cancel);
    }
}

#[async_trait]
impl IndexStore for FlakyIndexStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn register_instance(
        &self,
        identifier: InstanceIdentifier,
    ) -> DbResult<VersionedInstanceIdentifier> {
        self.inner.register_instance(identifier).await
    }

    async fn write_pending_deletion(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
        cleanup_after: DateTime<Utc>,
    ) -> DbResult<u64> {
        self.inner
            .write_pending_deletion(partition, scope, cleanup_after)
            .await
    }

    async fn discover_due(
        &self,
        batch_size: u32,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<PendingDeletion>> {
        self.log.push(Call::Discover);
        if *self.discover_fails.lock().unwrap() {
            return Err(DbError::Unavailable("index store offline".into()));
        }
        let result = self.inner.discover_due(batch_size, max_retries, cancel).await;
        let to_cancel = self.cancel_after_discover.lock().unwrap().take();
        if let Some(token) = to_cancel {
            token.cancel();
        }
        result
    }

    async fn purge(
        &self,
        instance: &VersionedInstanceIdentifier,
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        let fail = self.failing_purges.lock().unwrap().contains(instance);
        let result = if fail {
            Err(DbError::Unavailable("purge rejected".into()))
        } else {
            self.inner.purge(instance, cancel).await
        };
        self.log.push(Call::Purge {
            id: instance.clone(),
            ok: result.is_ok(),
        });
        result
    }

    async fn increment_retry(
        &self,
        instance: &VersionedInstanceIdentifier,
        next_cleanup_after: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> DbResult<u32> {
        let fail = self.failing_increments.lock().unwrap().contains(instance);
        let result = if fail {
            Err(DbError::Unavailable("increment rejected".into()))
        } else {
            self.inner
                .increment_retry(instance, next_cleanup_after, cancel)
                .await
        };
        self.log.push(Call::Increment {
            id: instance.clone(),
            ok: result.is_ok(),
        });
        result
    }

    async fn restore_pending(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        self.inner.restore_pending(partition, scope, now).await
    }

    async fn list_parked(&self, max_retries: u32, limit: u32) -> DbResult<Vec<PendingDeletion>> {
        self.inner.list_parked(max_retries, limit).await
    }

    async fn reset_retries(
        &self,
        instance: &VersionedInstanceIdentifier,
        cleanup_after: DateTime<Utc>,
    ) -> DbResult<()> {
        self.inner.reset_retries(instance, cleanup_after).await
    }

    async fn begin_unit_of_work(&self) -> DbResult<UnitOfWork> {
        self.log.push(Call::BeginUnitOfWork);
        self.inner.begin_unit_of_work().await
    }
}

/// The three stores wired to one call log.
pub struct Harness {
    pub log: CallLog,
    pub index: Arc<FlakyIndexStore>,
    pub metadata: Arc<FlakyBlobStore>,
    pub files: Arc<FlakyBlobStore>,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            index: Arc::new(FlakyIndexStore::new(log.clone())),
            metadata: Arc::new(FlakyBlobStore::new(BlobKind::Metadata, log.clone())),
            files: Arc::new(FlakyBlobStore::new(BlobKind::File, log.clone())),
            log,
        }
    }

    /// Register an instance, write both blobs, and schedule it with the
    /// given cleanup offset from now.
    pub async fn pending(
        &self,
        sop: &str,
        offset: chrono::Duration,
    ) -> VersionedInstanceIdentifier {
        let id = self
            .index
            .register_instance(InstanceIdentifier::new(
                PartitionKey::default(),
                "1.2.840",
                "1.2.840.1",
                sop,
            ))
            .await
            .unwrap();
        self.files.put(&id, b"pixel data").await.unwrap();
        self.metadata.put(&id, b"{}").await.unwrap();
        self.index
            .write_pending_deletion(
                id.partition(),
                &id.identifier.as_scope(),
                Utc::now() + offset,
            )
            .await
            .unwrap();
        id
    }

    /// Seed a pending record with an existing retry count.
    pub async fn pending_with_retries(
        &self,
        sop: &str,
        retry_count: u32,
    ) -> VersionedInstanceIdentifier {
        let id = self.pending(sop, chrono::Duration::minutes(-1)).await;
        let mut record = self.index.inner.get_pending(&id).await.unwrap();
        record.retry_count = retry_count;
        self.index.inner.insert_pending(record).await;
        id
    }
}
