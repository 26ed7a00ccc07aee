//! # Change Descriptors
//!
//! One [`AllocationChange`] per client-declared operation. Changes are
//! collected per connection and applied in declaration order.

use bl_02_reference_tree::{FileAttributes, FileMeta, Thumbnail};
use serde::{Deserialize, Serialize};
use shared_types::{AllocationId, ConnectionId, Hash};

/// File content and metadata declared by an upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    pub path: String,
    /// Stored (encoded) shard size.
    pub size: u64,
    pub content_hash: String,
    pub merkle_root: String,
    pub actual_file_size: u64,
    pub actual_file_hash: String,
    pub mime_type: String,
    pub thumbnail: Option<Thumbnail>,
    pub custom_meta: String,
    pub encrypted_key: String,
    pub attributes: FileAttributes,
}

impl FileUpload {
    /// Node metadata for this upload, stamped with the owning marker root.
    pub fn to_meta(&self, write_marker: Hash) -> FileMeta {
        FileMeta {
            content_hash: self.content_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            actual_file_size: self.actual_file_size,
            actual_file_hash: self.actual_file_hash.clone(),
            mime_type: self.mime_type.clone(),
            thumbnail: self.thumbnail.clone(),
            custom_meta: self.custom_meta.clone(),
            encrypted_key: self.encrypted_key.clone(),
            attributes: self.attributes.clone(),
            write_marker: Some(write_marker),
        }
    }
}

/// What a change does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// Create a file; missing parent directories are created.
    NewFile(FileUpload),
    /// Replace an existing file's content and metadata.
    UpdateFile(FileUpload),
    /// Remove a file or directory with everything below it.
    DeleteFile { path: String },
    /// Give a node a new name within its parent.
    Rename { path: String, new_name: String },
    /// Duplicate a node into `dest_dir`.
    Copy { path: String, dest_dir: String },
    /// Relocate a node into `dest_dir`.
    Move { path: String, dest_dir: String },
}

impl ChangeOperation {
    /// Path the change acts on.
    pub fn target_path(&self) -> &str {
        match self {
            ChangeOperation::NewFile(u) | ChangeOperation::UpdateFile(u) => &u.path,
            ChangeOperation::DeleteFile { path }
            | ChangeOperation::Rename { path, .. }
            | ChangeOperation::Copy { path, .. }
            | ChangeOperation::Move { path, .. } => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeOperation::NewFile(_) => "new_file",
            ChangeOperation::UpdateFile(_) => "update_file",
            ChangeOperation::DeleteFile { .. } => "delete_file",
            ChangeOperation::Rename { .. } => "rename",
            ChangeOperation::Copy { .. } => "copy",
            ChangeOperation::Move { .. } => "move",
        }
    }

    /// Upload whose temp file must be committed to the blob store.
    pub fn upload(&self) -> Option<&FileUpload> {
        match self {
            ChangeOperation::NewFile(u) | ChangeOperation::UpdateFile(u) => Some(u),
            _ => None,
        }
    }
}

/// A pending mutation declared on an upload connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationChange {
    pub connection_id: ConnectionId,
    pub allocation_id: AllocationId,
    /// Size delta this change contributes to the allocation.
    pub size: i64,
    pub operation: ChangeOperation,
}

impl AllocationChange {
    pub fn new(
        allocation_id: &str,
        connection_id: &str,
        size: i64,
        operation: ChangeOperation,
    ) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            allocation_id: allocation_id.to_string(),
            size,
            operation,
        }
    }
}
