//! # Core Domain Entities
//!
//! Identifiers and the allocation record.

use serde::{Deserialize, Serialize};

/// A 32-byte digest (tree hashes, allocation roots, lookup hashes).
pub type Hash = [u8; 32];

/// Allocation identifier assigned by the storage contract.
pub type AllocationId = String;

/// Client (wallet) identifier.
pub type ClientId = String;

/// This blobber's on-chain identifier.
pub type BlobberId = String;

/// Upload session identifier. All changes of one connection commit together.
pub type ConnectionId = String;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Lowercase hex rendering of a hash.
pub fn hash_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Short form for log lines.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..6])
}

/// Render an optional root; the empty root prints as `-`.
pub fn root_hex(root: &Option<Hash>) -> String {
    match root {
        Some(h) => hash_hex(h),
        None => "-".to_string(),
    }
}

/// Parse a 64-character hex string into a [`Hash`].
pub fn parse_hash(s: &str) -> Option<Hash> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Static part of a client storage contract, as known to this blobber.
///
/// The mutable tree root, redeemed pointer and redeem flag are persisted in
/// their own keys; see [`crate::AllocationState`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Allocation identifier.
    pub id: AllocationId,
    /// Creation transaction on chain.
    pub tx: String,
    /// Owner wallet.
    pub owner_id: ClientId,
    /// Owner ed25519 public key, used to verify write markers.
    pub owner_public_key: [u8; 32],
    /// Wallet paying for reads and writes.
    pub payer_id: ClientId,
    /// Capacity held on this blobber, in bytes.
    pub size: u64,
    /// Expiration (unix seconds).
    pub expiration: Timestamp,
    /// Set once the allocation has been finalized on chain.
    pub finalized: bool,
}

impl Allocation {
    /// True once `now` is at or past the expiration time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expiration
    }

    /// True if `client` may read metadata of this allocation.
    pub fn is_owner_or_payer(&self, client: &str) -> bool {
        self.owner_id == client || self.payer_id == client
    }
}
