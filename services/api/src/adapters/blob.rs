//! services/api/src/adapters/blob.rs
//!
//! Filesystem implementation of the `BlobStore` port. Each clip is written once to
//! its own file under the configured audio directory.

use async_trait::async_trait;
use bytes::Bytes;
use snore_core::domain::AudioFormat;
use snore_core::ports::{BlobStore, PortError, PortResult};
use std::io::ErrorKind;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the audio directory if it does not exist yet.
    pub async fn ensure_root(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store_blob(&self, data: Bytes, format: AudioFormat) -> PortResult<String> {
        let path = self
            .root
            .join(format!("clip_{}.{}", Uuid::new_v4(), format.extension()));
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| PortError::Storage(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn delete_blob(&self, blob_ref: &str) -> PortResult<()> {
        match tokio::fs::remove_file(blob_ref).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortError::Storage(format!("Failed to delete {}: {}", blob_ref, e))),
        }
    }
}
