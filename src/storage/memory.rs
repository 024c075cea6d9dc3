use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{BlobKind, BlobStore, BlobStoreError, BlobStoreResult};
use crate::models::VersionedInstanceIdentifier;

/// Process-local blob store backend.
pub struct InMemoryBlobStore {
    kind: BlobKind,
    blobs: Mutex<HashMap<VersionedInstanceIdentifier, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new(kind: BlobKind) -> Self {
        Self {
            kind,
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, id: &VersionedInstanceIdentifier, content: &[u8]) -> BlobStoreResult<()> {
        self.blobs.lock().await.insert(id.clone(), content.to_vec());
        Ok(())
    }

    async fn delete_if_exists(
        &self,
        id: &VersionedInstanceIdentifier,
        cancel: &CancellationToken,
    ) -> BlobStoreResult<()> {
        if cancel.is_cancelled() {
            return Err(BlobStoreError::Cancelled);
        }
        self.blobs.lock().await.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &VersionedInstanceIdentifier) -> BlobStoreResult<bool> {
        Ok(self.blobs.lock().await.contains_key(id))
    }

    fn kind(&self) -> BlobKind {
        self.kind
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceIdentifier, PartitionKey};

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryBlobStore::new(BlobKind::File);
        let cancel = CancellationToken::new();
        let id = InstanceIdentifier::new(PartitionKey::default(), "1", "1.1", "1.1.1").with_version(4);

        store.put(&id, b"pixels").await.unwrap();
        assert_eq!(store.len().await, 1);

        store.delete_if_exists(&id, &cancel).await.unwrap();
        store.delete_if_exists(&id, &cancel).await.unwrap();
        assert!(store.is_empty().await);
    }
}
