//! Blob store configuration for pixel data and descriptive metadata.
//!
//! Each store is configured independently:
//! - **Filesystem**: blobs under a local directory (default)
//! - **Memory**: process-local, for development and tests
//!
//! # Example Configuration
//!
//! ```toml
//! [storage.files]
//! path = "/var/lib/dicom-cleanup/files"
//!
//! [storage.metadata]
//! backend = "filesystem"
//! path = "/var/lib/dicom-cleanup/metadata"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Storage configuration for the two blob stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Binary content (pixel data) store.
    #[serde(default = "default_files_store")]
    pub files: BlobStoreConfig,

    /// Descriptive metadata store.
    #[serde(default = "default_metadata_store")]
    pub metadata: BlobStoreConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            files: default_files_store(),
            metadata: default_metadata_store(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.files
            .validate()
            .map_err(|e| format!("storage.files: {}", e))?;
        self.metadata
            .validate()
            .map_err(|e| format!("storage.metadata: {}", e))?;
        if self.files.backend == BlobStoreBackend::Filesystem
            && self.metadata.backend == BlobStoreBackend::Filesystem
            && self.files.path == self.metadata.path
        {
            return Err("storage.files and storage.metadata must use different paths".into());
        }
        Ok(())
    }
}

fn default_files_store() -> BlobStoreConfig {
    BlobStoreConfig::filesystem("/var/lib/dicom-cleanup/files")
}

fn default_metadata_store() -> BlobStoreConfig {
    BlobStoreConfig::filesystem("/var/lib/dicom-cleanup/metadata")
}

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlobStoreBackend {
    /// Store blobs on the local filesystem.
    #[default]
    Filesystem,
    /// Keep blobs in memory. Content is lost on exit.
    Memory,
}

/// One blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlobStoreConfig {
    /// Storage backend to use.
    #[serde(default)]
    pub backend: BlobStoreBackend,

    /// Base directory (filesystem backend only).
    /// Blobs are stored as `{path}/{partition}/{study}/{series}/{sop}_{version}.{ext}`.
    #[serde(default)]
    pub path: String,

    /// Create the directory if it doesn't exist.
    /// Default: true
    #[serde(default = "default_true")]
    pub create_dir: bool,

    /// File permissions (Unix mode) for new files.
    /// Default: 0o600 (owner read/write only)
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Directory permissions (Unix mode) for new directories.
    /// Default: 0o700 (owner read/write/execute only)
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,
}

impl BlobStoreConfig {
    pub fn filesystem(path: impl Into<String>) -> Self {
        Self {
            backend: BlobStoreBackend::Filesystem,
            path: path.into(),
            create_dir: true,
            file_mode: default_file_mode(),
            dir_mode: default_dir_mode(),
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: BlobStoreBackend::Memory,
            ..Self::filesystem("")
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.backend {
            BlobStoreBackend::Memory => Ok(()),
            BlobStoreBackend::Filesystem => {
                if self.path.is_empty() {
                    return Err("Filesystem storage path cannot be empty".to_string());
                }
                Ok(())
            }
        }
    }

    pub fn root(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

fn default_true() -> bool {
    true
}

fn default_file_mode() -> u32 {
    0o600
}

fn default_dir_mode() -> u32 {
    0o700
}
