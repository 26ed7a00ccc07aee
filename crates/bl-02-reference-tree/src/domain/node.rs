//! # Reference Nodes
//!
//! A node is either a directory (ordered children by name) or a file (content
//! and metadata). Both variants share identity, placement, hash and size.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shared_types::{Hash, HashStrategy, Timestamp};

/// Who is charged for reads of a file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhoPays {
    #[default]
    Owner,
    ThirdParty,
}

impl WhoPays {
    fn as_str(&self) -> &'static str {
        match self {
            WhoPays::Owner => "owner",
            WhoPays::ThirdParty => "3rd_party",
        }
    }
}

/// Client-controlled file attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub who_pays_for_reads: WhoPays,
}

/// Thumbnail stored alongside a file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub hash: String,
    pub size: u64,
    pub actual_hash: String,
    pub actual_size: u64,
}

/// File-specific metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Hash of the stored (encoded) shard.
    pub content_hash: String,
    /// Merkle root over the shard's blocks.
    pub merkle_root: String,
    /// Size of the original file before encoding.
    pub actual_file_size: u64,
    /// Hash of the original file before encoding.
    pub actual_file_hash: String,
    pub mime_type: String,
    pub thumbnail: Option<Thumbnail>,
    pub custom_meta: String,
    pub encrypted_key: String,
    pub attributes: FileAttributes,
    /// Root of the write marker that last changed this file. Not hashed.
    pub write_marker: Option<Hash>,
}

/// Directory or file payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Directory { children: BTreeMap<String, Hash> },
    File(FileMeta),
}

/// One entry of an allocation's tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceNode {
    pub allocation_id: String,
    /// `H(allocation_id, path)`
    pub lookup_hash: Hash,
    /// Lookup hash of the parent directory; `None` for the root.
    pub parent: Option<Hash>,
    pub name: String,
    pub path: String,
    /// Integrity hash.
    pub hash: Hash,
    /// File size, or the sum of child sizes for a directory.
    pub size: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub kind: NodeKind,
}

impl ReferenceNode {
    pub fn new_directory(
        allocation_id: &str,
        lookup_hash: Hash,
        parent: Option<Hash>,
        path: &str,
        now: Timestamp,
    ) -> Self {
        Self {
            allocation_id: allocation_id.to_string(),
            lookup_hash,
            parent,
            name: crate::domain::path::file_name(path).to_string(),
            path: path.to_string(),
            hash: [0; 32],
            size: 0,
            created_at: now,
            updated_at: now,
            kind: NodeKind::Directory {
                children: BTreeMap::new(),
            },
        }
    }

    pub fn new_file(
        allocation_id: &str,
        lookup_hash: Hash,
        parent: Hash,
        path: &str,
        size: u64,
        meta: FileMeta,
        now: Timestamp,
    ) -> Self {
        Self {
            allocation_id: allocation_id.to_string(),
            lookup_hash,
            parent: Some(parent),
            name: crate::domain::path::file_name(path).to_string(),
            path: path.to_string(),
            hash: [0; 32],
            size,
            created_at: now,
            updated_at: now,
            kind: NodeKind::File(meta),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File(_))
    }

    pub fn file(&self) -> Option<&FileMeta> {
        match &self.kind {
            NodeKind::File(meta) => Some(meta),
            NodeKind::Directory { .. } => None,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Hash>> {
        match &self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File(_) => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Hash>> {
        match &mut self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File(_) => None,
        }
    }

    /// Integrity hash of this node given its children's hashes in name order.
    ///
    /// Timestamps and the `write_marker` stamp are excluded so the hash is a
    /// function of content and placement only.
    pub fn compute_hash(&self, strategy: &dyn HashStrategy, child_hashes: &[Hash]) -> Hash {
        let size = self.size.to_string();
        match &self.kind {
            NodeKind::File(meta) => {
                let actual_size = meta.actual_file_size.to_string();
                let (thumb_hash, thumb_size) = match &meta.thumbnail {
                    Some(t) => (t.hash.clone(), t.size.to_string()),
                    None => (String::new(), String::new()),
                };
                strategy.digest(&[
                    self.allocation_id.as_bytes(),
                    b"f",
                    self.path.as_bytes(),
                    self.name.as_bytes(),
                    size.as_bytes(),
                    meta.content_hash.as_bytes(),
                    meta.merkle_root.as_bytes(),
                    actual_size.as_bytes(),
                    meta.actual_file_hash.as_bytes(),
                    meta.mime_type.as_bytes(),
                    meta.custom_meta.as_bytes(),
                    meta.encrypted_key.as_bytes(),
                    meta.attributes.who_pays_for_reads.as_str().as_bytes(),
                    thumb_hash.as_bytes(),
                    thumb_size.as_bytes(),
                ])
            }
            NodeKind::Directory { .. } => {
                let mut fields: Vec<&[u8]> = vec![
                    self.allocation_id.as_bytes(),
                    &b"d"[..],
                    self.path.as_bytes(),
                    self.name.as_bytes(),
                    size.as_bytes(),
                ];
                fields.extend(child_hashes.iter().map(|h| h.as_slice()));
                strategy.digest(&fields)
            }
        }
    }
}
