//! Deferred deletion of DICOM instances.
//!
//! Deletion happens in two phases:
//!
//! 1. [`DeletionScheduler`] moves live index entries for a study, series or
//!    instance into the pending-deletion set with a `cleanup_after` time.
//! 2. [`CleanupReconciler`] periodically discovers due records, removes their
//!    file and metadata blobs, and purges the record once both are gone.
//!
//! Failed cleanups are retried with a fixed backoff until the retry limit is
//! exceeded, after which the record is parked for an operator.

mod reconciler;
mod scheduler;
#[cfg(test)]
pub(crate) mod test_support;

pub use reconciler::{CleanupPassResult, CleanupReconciler};
pub use scheduler::DeletionScheduler;

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        config::BlobStoreConfig,
        db::{
            IndexStore,
            sqlite::SqliteIndexStore,
            tests::harness::{create_sqlite_pool, run_sqlite_migrations},
        },
        models::{EntityScope, InstanceIdentifier, PartitionKey},
        storage::{BlobKind, BlobStore, FilesystemBlobStore},
    };

    fn fs_store(root: &std::path::Path, kind: BlobKind) -> Arc<dyn BlobStore> {
        let config = BlobStoreConfig::filesystem(root.join(kind.as_str()).to_string_lossy());
        Arc::new(FilesystemBlobStore::new(config, kind).unwrap())
    }

    #[tokio::test]
    async fn test_delete_study_end_to_end() {
        let (pool, dir) = create_sqlite_pool().await;
        run_sqlite_migrations(&pool).await;
        let index: Arc<dyn IndexStore> = Arc::new(SqliteIndexStore::new(pool));
        let files = fs_store(dir.path(), BlobKind::File);
        let metadata = fs_store(dir.path(), BlobKind::Metadata);

        let partition = PartitionKey::default();
        let mut ids = Vec::new();
        for sop in ["1.2.3.1", "1.2.3.2"] {
            let id = index
                .register_instance(InstanceIdentifier::new(partition, "1.2", "1.2.3", sop))
                .await
                .unwrap();
            files.put(&id, b"DICM").await.unwrap();
            metadata.put(&id, b"{}").await.unwrap();
            ids.push(id);
        }
        let other = index
            .register_instance(InstanceIdentifier::new(partition, "9.9", "9.9.1", "9.9.1.1"))
            .await
            .unwrap();
        files.put(&other, b"DICM").await.unwrap();

        let scheduler = DeletionScheduler::new(index.clone(), Duration::from_secs(3600));
        let reconciler = CleanupReconciler::new(index.clone(), metadata.clone(), files.clone());
        let cancel = CancellationToken::new();

        // Soft delete: nothing is due inside the grace period.
        scheduler
            .schedule_deferred_deletion(partition, &EntityScope::study("1.2"))
            .await
            .unwrap();
        let pass = reconciler
            .run_cleanup_pass(10, 3, Duration::from_secs(60), &cancel)
            .await;
        assert!(pass.success);
        assert_eq!(pass.discovered, 0);

        // Restore, then hard delete.
        scheduler
            .restore_scheduled_deletion(partition, &EntityScope::study("1.2"))
            .await
            .unwrap();
        scheduler
            .schedule_deletion(partition, &EntityScope::study("1.2"), Duration::ZERO)
            .await
            .unwrap();

        let pass = reconciler
            .run_cleanup_pass(10, 3, Duration::from_secs(60), &cancel)
            .await;
        assert!(pass.success);
        assert_eq!(pass.purged, 2);

        for id in &ids {
            assert!(!files.exists(id).await.unwrap());
            assert!(!metadata.exists(id).await.unwrap());
        }
        assert!(files.exists(&other).await.unwrap());
        assert!(index.list_parked(3, 10).await.unwrap().is_empty());

        // Re-uploading the same UIDs gets a fresh version.
        let reuploaded = index
            .register_instance(ids[0].identifier.clone())
            .await
            .unwrap();
        assert!(reuploaded.version > ids[1].version);
    }
}
