//! Error types for the reference tree

use shared_types::KVStoreError;
use thiserror::Error;

/// Reference tree errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The final path segment does not exist.
    #[error("Reference not found: {path}")]
    NotFound {
        /// Requested path
        path: String,
    },

    /// An intermediate directory of the path does not exist.
    #[error("Invalid reference path: {path}")]
    InvalidReferencePath {
        /// Requested path
        path: String,
    },

    /// Path is malformed.
    #[error("Invalid path {path}: {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// A node already exists at the path.
    #[error("Reference already exists: {path}")]
    AlreadyExists {
        /// Conflicting path
        path: String,
    },

    /// A directory was expected.
    #[error("Not a directory: {path}")]
    NotADirectory {
        /// Offending path
        path: String,
    },

    /// A file was expected.
    #[error("Not a file: {path}")]
    NotAFile {
        /// Offending path
        path: String,
    },

    /// Structurally impossible request (e.g. moving a directory into itself).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Lookup hash not present in the tree.
    #[error("Unknown node {lookup}")]
    UnknownNode {
        /// Hex lookup hash
        lookup: String,
    },

    /// Persisted nodes do not form a valid tree.
    #[error("Corrupt tree: {0}")]
    Corrupt(String),

    /// Recomputation produced a root other than the committed allocation root.
    #[error("Recomputed root {computed} of {allocation_id} diverges from committed root {committed}")]
    RootDiverged {
        /// Allocation
        allocation_id: String,
        /// Root recorded by the last write marker
        committed: String,
        /// Root after recomputation
        computed: String,
    },

    /// A commit changed the allocation while the tree was being rewritten.
    #[error("Allocation {allocation_id} changed during the update")]
    Concurrent {
        /// Allocation
        allocation_id: String,
    },

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),
}
