//! # Hash Strategies
//!
//! Integrity and lookup hashes are computed over `:`-joined fields. The digest
//! function is pluggable so a node can match whatever encoding the network's
//! storage contract verifies against.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::entities::Hash;

/// Digest over an ordered list of fields.
pub trait HashStrategy: Send + Sync {
    /// Digest of `fields` joined by `:`.
    fn digest(&self, fields: &[&[u8]]) -> Hash;

    /// Name used in config and logs.
    fn name(&self) -> &'static str;

    /// Lookup hash of a path inside an allocation.
    fn lookup_hash(&self, allocation_id: &str, path: &str) -> Hash {
        self.digest(&[allocation_id.as_bytes(), path.as_bytes()])
    }
}

fn feed<D: Digest>(hasher: &mut D, fields: &[&[u8]]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(field);
    }
}

/// SHA-256 (default).
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Strategy;

impl HashStrategy for Sha256Strategy {
    fn digest(&self, fields: &[&[u8]]) -> Hash {
        let mut hasher = Sha256::new();
        feed(&mut hasher, fields);
        hasher.finalize().into()
    }

    fn name(&self) -> &'static str {
        "sha256"
    }
}

/// Keccak-256, for networks that verify with SHA-3 family digests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Keccak256Strategy;

impl HashStrategy for Keccak256Strategy {
    fn digest(&self, fields: &[&[u8]]) -> Hash {
        let mut hasher = Keccak256::new();
        feed(&mut hasher, fields);
        hasher.finalize().into()
    }

    fn name(&self) -> &'static str {
        "keccak256"
    }
}
