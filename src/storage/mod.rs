//! Blob stores holding instance content.
//!
//! Two independently owned stores hold each instance's bytes:
//!
//! - **Files**: binary content (pixel data), stored as `.dcm`
//! - **Metadata**: descriptive metadata, stored as `.json`
//!
//! Both are addressed by a [`VersionedInstanceIdentifier`] so cleanup of one
//! generation never touches a newer generation sharing the same UIDs. The
//! backend for each is configured via `[storage.files]` and `[storage.metadata]`.

mod filesystem;
mod memory;

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
pub use filesystem::FilesystemBlobStore;
pub use memory::InMemoryBlobStore;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::{BlobStoreBackend, BlobStoreConfig},
    models::VersionedInstanceIdentifier,
};

/// Errors that can occur during blob store operations.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

/// Which of the two stores a backend serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    File,
    Metadata,
}

impl BlobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobKind::File => "file",
            BlobKind::Metadata => "metadata",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            BlobKind::File => "dcm",
            BlobKind::Metadata => "json",
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for pluggable blob store backends.
///
/// `delete_if_exists` must be idempotent: deleting an absent blob succeeds.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write (or overwrite) the blob for `id`.
    async fn put(&self, id: &VersionedInstanceIdentifier, content: &[u8]) -> BlobStoreResult<()>;

    /// Delete the blob for `id`. Succeeds as a no-op if it does not exist.
    async fn delete_if_exists(
        &self,
        id: &VersionedInstanceIdentifier,
        cancel: &CancellationToken,
    ) -> BlobStoreResult<()>;

    /// Check if a blob exists.
    async fn exists(&self, id: &VersionedInstanceIdentifier) -> BlobStoreResult<bool>;

    /// Which store this backend serves.
    fn kind(&self) -> BlobKind;

    /// Get the backend type name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

/// Run a blob store call, abandoning it once `cancel` fires.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> BlobStoreResult<T>
where
    F: Future<Output = BlobStoreResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(BlobStoreError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BlobStoreError::Cancelled),
        result = fut => result,
    }
}

/// Create a blob store backend from configuration.
pub fn create_blob_store(
    config: &BlobStoreConfig,
    kind: BlobKind,
) -> BlobStoreResult<Arc<dyn BlobStore>> {
    match config.backend {
        BlobStoreBackend::Filesystem => {
            info!(kind = %kind, path = %config.path, "Using filesystem blob store backend");
            Ok(Arc::new(FilesystemBlobStore::new(config.clone(), kind)?))
        }
        BlobStoreBackend::Memory => {
            info!(kind = %kind, "Using in-memory blob store backend");
            Ok(Arc::new(InMemoryBlobStore::new(kind)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_extensions() {
        assert_eq!(BlobKind::File.extension(), "dcm");
        assert_eq!(BlobKind::Metadata.extension(), "json");
        assert_eq!(BlobKind::Metadata.to_string(), "metadata");
    }

    #[test]
    fn test_create_memory_store() {
        let store = create_blob_store(&BlobStoreConfig::memory(), BlobKind::File).unwrap();
        assert_eq!(store.backend_name(), "memory");
        assert_eq!(store.kind(), BlobKind::File);
    }

    #[test]
    fn test_create_filesystem_store_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("metadata");
        let config = BlobStoreConfig::filesystem(root.to_string_lossy());
        let store = create_blob_store(&config, BlobKind::Metadata).unwrap();
        assert_eq!(store.backend_name(), "filesystem");
        assert!(root.is_dir());
    }
}
