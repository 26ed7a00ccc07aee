//! # Filesystem Blob Store
//!
//! ```text
//! {root}/{allocation}/tmp/{connection}/{sha256(path)}   uploaded, uncommitted
//! {root}/{allocation}/content/{content_hash}            committed
//! ```
//!
//! Commit is a rename inside one filesystem, so a crash leaves the bytes
//! either in the temp area or in content, never half-copied.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bl_03_allocation_changes::{BlobError, BlobFile, BlobStore};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

pub struct FsBlobStore {
    root: PathBuf,
}

fn io(e: std::io::Error) -> BlobError {
    BlobError::Io(e.to_string())
}

/// Path components must not escape the store root.
fn component(value: &str) -> Result<&str, BlobError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(value)
    } else {
        Err(BlobError::Io(format!("invalid path component {:?}", value)))
    }
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn temp_path(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
    ) -> Result<PathBuf, BlobError> {
        let name = hex::encode(Sha256::digest(file.path.as_bytes()));
        Ok(self
            .root
            .join(component(allocation_id)?)
            .join("tmp")
            .join(component(connection_id)?)
            .join(name))
    }

    fn content_path(&self, allocation_id: &str, content_hash: &str) -> Result<PathBuf, BlobError> {
        Ok(self
            .root
            .join(component(allocation_id)?)
            .join("content")
            .join(component(content_hash)?))
    }
}

async fn ensure_parent(path: &Path) -> Result<(), BlobError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io)?;
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<(), BlobError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io(e)),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write_temp(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
        data: &[u8],
    ) -> Result<(), BlobError> {
        let path = self.temp_path(allocation_id, file, connection_id)?;
        ensure_parent(&path).await?;
        fs::write(&path, data).await.map_err(io)
    }

    async fn commit_write(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
    ) -> Result<(), BlobError> {
        let from = self.temp_path(allocation_id, file, connection_id)?;
        let to = self.content_path(allocation_id, &file.content_hash)?;
        ensure_parent(&to).await?;
        match fs::rename(&from, &to).await {
            Ok(()) => {
                debug!(
                    "[runtime] Committed {} as {} for {}",
                    file.path, file.content_hash, allocation_id
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::TempNotFound {
                path: file.path.clone(),
                connection_id: connection_id.to_string(),
            }),
            Err(e) => Err(io(e)),
        }
    }

    async fn delete_temp_file(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
    ) -> Result<(), BlobError> {
        remove_if_present(&self.temp_path(allocation_id, file, connection_id)?).await
    }

    async fn delete_content(&self, allocation_id: &str, content_hash: &str) -> Result<(), BlobError> {
        remove_if_present(&self.content_path(allocation_id, content_hash)?).await
    }

    async fn has_content(&self, allocation_id: &str, content_hash: &str) -> Result<bool, BlobError> {
        fs::try_exists(self.content_path(allocation_id, content_hash)?)
            .await
            .map_err(io)
    }
}
