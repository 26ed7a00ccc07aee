//! # Outbound Ports
//!
//! Content storage. Uploaded bytes land in a per-connection temp area and are
//! moved into content-addressed storage when the connection commits.

use async_trait::async_trait;

use crate::domain::change::FileUpload;
use crate::error::BlobError;

/// Identifies one uploaded file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobFile {
    pub path: String,
    pub content_hash: String,
}

impl From<&FileUpload> for BlobFile {
    fn from(upload: &FileUpload) -> Self {
        Self {
            path: upload.path.clone(),
            content_hash: upload.content_hash.clone(),
        }
    }
}

/// Content-addressed blob storage.
///
/// Production: `FsBlobStore` (blobber-runtime)
/// Testing: [`crate::InMemoryBlobStore`]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stage uploaded bytes for `file` on `connection_id`.
    async fn write_temp(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
        data: &[u8],
    ) -> Result<(), BlobError>;

    /// Move the temp file into committed content keyed by its content hash.
    async fn commit_write(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
    ) -> Result<(), BlobError>;

    /// Drop a temp file that will never be committed. Missing is not an error.
    async fn delete_temp_file(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
    ) -> Result<(), BlobError>;

    /// Remove committed content. Missing is not an error.
    async fn delete_content(&self, allocation_id: &str, content_hash: &str)
        -> Result<(), BlobError>;

    async fn has_content(&self, allocation_id: &str, content_hash: &str)
        -> Result<bool, BlobError>;
}
