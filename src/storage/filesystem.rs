use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{BlobKind, BlobStore, BlobStoreError, BlobStoreResult, cancellable};
use crate::{config::BlobStoreConfig, models::VersionedInstanceIdentifier};

/// Filesystem blob store backend.
///
/// Blobs live at `{root}/{partition}/{study}/{series}/{sop}_{version}.{ext}`.
pub struct FilesystemBlobStore {
    config: BlobStoreConfig,
    kind: BlobKind,
}

impl FilesystemBlobStore {
    pub fn new(config: BlobStoreConfig, kind: BlobKind) -> BlobStoreResult<Self> {
        if config.path.is_empty() {
            return Err(BlobStoreError::Config(format!(
                "{} store requires a filesystem path",
                kind
            )));
        }

        let store = Self { config, kind };

        if store.config.create_dir {
            let path = Path::new(&store.config.path);
            if !path.exists() {
                info!(kind = %kind, path = %store.config.path, "Creating blob store directory");
                std::fs::create_dir_all(path)?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(
                        path,
                        std::fs::Permissions::from_mode(store.config.dir_mode),
                    )?;
                }
            }
        }

        Ok(store)
    }

    fn blob_path(&self, id: &VersionedInstanceIdentifier) -> BlobStoreResult<PathBuf> {
        for component in [
            id.study_instance_uid(),
            id.series_instance_uid(),
            id.sop_instance_uid(),
        ] {
            if component.is_empty()
                || component == "."
                || component == ".."
                || component.contains(['/', '\\'])
            {
                return Err(BlobStoreError::InvalidKey(id.to_string()));
            }
        }

        Ok(self
            .config
            .root()
            .join(id.partition().to_string())
            .join(id.study_instance_uid())
            .join(id.series_instance_uid())
            .join(format!(
                "{}_{}.{}",
                id.sop_instance_uid(),
                id.version,
                self.kind.extension()
            )))
    }

    async fn ensure_parent(&self, path: &Path) -> BlobStoreResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        if tokio::fs::metadata(parent).await.is_ok() {
            return Ok(());
        }
        tokio::fs::create_dir_all(parent).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                parent,
                std::fs::Permissions::from_mode(self.config.dir_mode),
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    #[instrument(skip(self, content), fields(kind = %self.kind, size = content.len()))]
    async fn put(&self, id: &VersionedInstanceIdentifier, content: &[u8]) -> BlobStoreResult<()> {
        let path = self.blob_path(id)?;
        debug!(instance = %id, path = %path.display(), "Storing blob on filesystem");

        self.ensure_parent(&path).await?;

        // Write to a temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &temp_path,
                std::fs::Permissions::from_mode(self.config.file_mode),
            )
            .await?;
        }

        tokio::fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    #[instrument(skip(self, cancel), fields(kind = %self.kind))]
    async fn delete_if_exists(
        &self,
        id: &VersionedInstanceIdentifier,
        cancel: &CancellationToken,
    ) -> BlobStoreResult<()> {
        let path = self.blob_path(id)?;

        cancellable(cancel, async {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(instance = %id, path = %path.display(), "Blob deleted");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(instance = %id, path = %path.display(), "Blob already absent");
                    Ok(())
                }
                Err(e) => Err(BlobStoreError::Io(e)),
            }
        })
        .await
    }

    #[instrument(skip(self), fields(kind = %self.kind))]
    async fn exists(&self, id: &VersionedInstanceIdentifier) -> BlobStoreResult<bool> {
        let path = self.blob_path(id)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    fn kind(&self) -> BlobKind {
        self.kind
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
