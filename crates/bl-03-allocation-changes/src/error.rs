//! Error types for allocation changes

use bl_02_reference_tree::TreeError;
use shared_types::KVStoreError;
use thiserror::Error;

/// Blob store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    /// No temp file was uploaded for this file on this connection.
    #[error("Temp file not found: {path} on connection {connection_id}")]
    TempNotFound {
        /// File path
        path: String,
        /// Upload connection
        connection_id: String,
    },

    /// Committed content is missing.
    #[error("Content not found: {content_hash}")]
    ContentNotFound {
        /// Content hash
        content_hash: String,
    },

    /// Underlying storage failure.
    #[error("Blob I/O error: {0}")]
    Io(String),
}

/// Errors from applying or collecting changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeError {
    /// A directory on the way to the target does not exist.
    #[error("Invalid reference path: {path}")]
    InvalidReferencePath {
        /// Requested path
        path: String,
    },

    /// The target file does not exist.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Requested path
        path: String,
    },

    /// The change does not fit the tree (target exists, name collision,
    /// directory into itself, malformed path).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The working copy is inconsistent.
    #[error("Tree error: {0}")]
    Tree(TreeError),

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),

    /// Blob store failure.
    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),
}

impl ChangeError {
    /// Client-caused failures. Retrying the same change cannot succeed.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ChangeError::InvalidReferencePath { .. }
                | ChangeError::FileNotFound { .. }
                | ChangeError::InvalidOperation(_)
        )
    }
}

impl From<TreeError> for ChangeError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::NotFound { path } => ChangeError::FileNotFound { path },
            TreeError::InvalidReferencePath { path } => ChangeError::InvalidReferencePath { path },
            TreeError::AlreadyExists { .. }
            | TreeError::InvalidPath { .. }
            | TreeError::NotADirectory { .. }
            | TreeError::NotAFile { .. }
            | TreeError::InvalidOperation(_) => ChangeError::InvalidOperation(e.to_string()),
            TreeError::Store(e) => ChangeError::Store(e),
            TreeError::UnknownNode { .. }
            | TreeError::Corrupt(_)
            | TreeError::RootDiverged { .. }
            | TreeError::Concurrent { .. } => ChangeError::Tree(e),
        }
    }
}
