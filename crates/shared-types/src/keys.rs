//! # Key Layout
//!
//! Every persisted key is `<prefix>` followed by `:`-separated components.
//! Numeric components are zero-padded so prefix scans return them in order.
//! Identifier components must be non-empty and free of `:`, otherwise a scan
//! over one identifier would also match another's rows.
//!
//! | Prefix | Key                          | Value                         |
//! |--------|------------------------------|-------------------------------|
//! | `a:`   | `a:{alloc}`                  | bincode `Allocation`          |
//! | `ar:`  | `ar:{alloc}`                 | current tree root (32 bytes)  |
//! | `lr:`  | `lr:{alloc}`                 | latest redeemed root          |
//! | `rr:`  | `rr:{alloc}`                 | present while redeem required |
//! | `r:`   | `r:{alloc}:{lookup_hex}`     | bincode reference node        |
//! | `c:`   | `c:{alloc}:{conn}:{idx}`     | bincode allocation change     |
//! | `wm:`  | `wm:{alloc}:{seq}`           | bincode write-marker entity   |
//! | `ws:`  | `ws:{alloc}`                 | last assigned sequence (u64)  |
//! | `wr:`  | `wr:{root_hex}`              | (alloc, seq) of latest marker |

use crate::entities::{hash_hex, Hash};

/// Separator between key components.
pub const SEPARATOR: char = ':';

/// Whether `id` can be used as a key component.
pub fn is_valid_component(id: &str) -> bool {
    !id.is_empty() && !id.contains(SEPARATOR)
}

/// Key prefixes for the blobber keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPrefix {
    /// Static allocation record.
    Allocation,
    /// Current allocation tree root.
    AllocationRoot,
    /// Latest redeemed write-marker root.
    RedeemedRoot,
    /// Redemption-required flag.
    RedeemRequired,
    /// Reference tree node.
    Reference,
    /// Pending allocation change.
    Change,
    /// Write-marker record.
    WriteMarker,
    /// Write-marker sequence counter.
    MarkerSequence,
    /// Root hash to marker index.
    MarkerRoot,
}

impl KeyPrefix {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            KeyPrefix::Allocation => b"a:",
            KeyPrefix::AllocationRoot => b"ar:",
            KeyPrefix::RedeemedRoot => b"lr:",
            KeyPrefix::RedeemRequired => b"rr:",
            KeyPrefix::Reference => b"r:",
            KeyPrefix::Change => b"c:",
            KeyPrefix::WriteMarker => b"wm:",
            KeyPrefix::MarkerSequence => b"ws:",
            KeyPrefix::MarkerRoot => b"wr:",
        }
    }

    /// Prefix followed by the given components, joined with `:`.
    pub fn key(&self, parts: &[&str]) -> Vec<u8> {
        let mut key = self.as_bytes().to_vec();
        key.extend_from_slice(parts.join(":").as_bytes());
        key
    }

    /// Like [`key`](Self::key) with a trailing `:`, for scanning children.
    pub fn scan_prefix(&self, parts: &[&str]) -> Vec<u8> {
        let mut key = self.key(parts);
        key.push(b':');
        key
    }

    /// Strip this prefix and return the remaining component string.
    pub fn strip<'a>(&self, key: &'a [u8]) -> Option<&'a str> {
        key.strip_prefix(self.as_bytes())
            .and_then(|rest| std::str::from_utf8(rest).ok())
    }
}

pub fn allocation_key(alloc: &str) -> Vec<u8> {
    KeyPrefix::Allocation.key(&[alloc])
}

pub fn allocation_root_key(alloc: &str) -> Vec<u8> {
    KeyPrefix::AllocationRoot.key(&[alloc])
}

pub fn redeemed_root_key(alloc: &str) -> Vec<u8> {
    KeyPrefix::RedeemedRoot.key(&[alloc])
}

pub fn redeem_required_key(alloc: &str) -> Vec<u8> {
    KeyPrefix::RedeemRequired.key(&[alloc])
}

pub fn reference_key(alloc: &str, lookup_hash: &Hash) -> Vec<u8> {
    KeyPrefix::Reference.key(&[alloc, &hash_hex(lookup_hash)])
}

pub fn change_key(alloc: &str, connection: &str, index: u32) -> Vec<u8> {
    KeyPrefix::Change.key(&[alloc, connection, &format!("{:08}", index)])
}

pub fn marker_key(alloc: &str, sequence: u64) -> Vec<u8> {
    KeyPrefix::WriteMarker.key(&[alloc, &format!("{:020}", sequence)])
}

pub fn marker_sequence_key(alloc: &str) -> Vec<u8> {
    KeyPrefix::MarkerSequence.key(&[alloc])
}

pub fn marker_root_key(root: &Hash) -> Vec<u8> {
    KeyPrefix::MarkerRoot.key(&[&hash_hex(root)])
}
