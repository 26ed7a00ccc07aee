//! # Write Markers
//!
//! A write marker is the client's signed statement that the allocation moved
//! from `previous_allocation_root` to `allocation_root`. The ledger wraps it
//! in a [`WriteMarkerEntity`] carrying the sequence number and redemption
//! state.

use serde::{Deserialize, Serialize};
use shared_types::{
    hash_hex, verify_signature, AllocationId, BlobberId, ClientId, Hash, IdentityError,
    NodeIdentity, Timestamp,
};

/// Client-signed commitment to one allocation root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMarker {
    pub allocation_id: AllocationId,
    pub allocation_root: Hash,
    /// `None` for the first marker of an allocation.
    pub previous_allocation_root: Option<Hash>,
    pub blobber_id: BlobberId,
    pub client_id: ClientId,
    /// Size delta of the connection this marker closes.
    pub size: i64,
    pub timestamp: Timestamp,
    /// ed25519 signature over [`WriteMarker::signing_payload`].
    pub signature: Vec<u8>,
}

impl WriteMarker {
    /// Bytes the client signs.
    pub fn signing_payload(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            hash_hex(&self.allocation_root),
            self.previous_allocation_root
                .as_ref()
                .map(hash_hex)
                .unwrap_or_default(),
            self.allocation_id,
            self.blobber_id,
            self.client_id,
            self.size,
            self.timestamp
        )
    }

    /// Sign with the client key, replacing any previous signature.
    pub fn signed_by(mut self, client: &NodeIdentity) -> Self {
        self.signature = client.sign(self.signing_payload().as_bytes()).to_vec();
        self
    }

    pub fn verify(&self, owner_public_key: &[u8; 32]) -> Result<(), IdentityError> {
        verify_signature(
            owner_public_key,
            self.signing_payload().as_bytes(),
            &self.signature,
        )
    }

    pub fn is_first(&self) -> bool {
        self.previous_allocation_root.is_none()
    }
}

/// Redemption state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerStatus {
    /// Recorded, not yet confirmed on chain.
    Pending,
    /// Confirmed on chain; the redeemed pointer has reached this root.
    Committed,
    /// Terminal. Never redeemed.
    Failed,
}

impl std::fmt::Display for MarkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarkerStatus::Pending => "pending",
            MarkerStatus::Committed => "committed",
            MarkerStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A write marker as stored by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMarkerEntity {
    pub marker: WriteMarker,
    /// Per-allocation, starting at 1, strictly increasing.
    pub sequence: u64,
    pub status: MarkerStatus,
    pub status_message: String,
    /// Hash of the latest redemption transaction submitted for this marker.
    pub close_txn_id: Option<String>,
    /// Redemption transactions submitted so far.
    pub redeem_attempts: u32,
    /// Consecutive confirmation rounds that ended without a verdict.
    pub unverified_rounds: u32,
    /// Rounds spent waiting on the current `close_txn_id`.
    pub txn_rounds: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl WriteMarkerEntity {
    pub fn root(&self) -> Hash {
        self.marker.allocation_root
    }

    pub fn is_pending(&self) -> bool {
        self.status == MarkerStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(prev: Option<Hash>) -> WriteMarker {
        WriteMarker {
            allocation_id: "a1".into(),
            allocation_root: [2; 32],
            previous_allocation_root: prev,
            blobber_id: "b1".into(),
            client_id: "c1".into(),
            size: 42,
            timestamp: 1_700_000_000,
            signature: Vec::new(),
        }
    }

    #[test]
    fn test_signature_covers_every_field() {
        let client = NodeIdentity::from_secret([9; 32]);
        let signed = marker(Some([1; 32])).signed_by(&client);
        assert!(signed.verify(&client.public_key()).is_ok());

        let mut tampered = signed.clone();
        tampered.size = 43;
        assert_eq!(
            tampered.verify(&client.public_key()),
            Err(IdentityError::BadSignature)
        );

        let mut rechained = signed;
        rechained.previous_allocation_root = None;
        assert!(rechained.verify(&client.public_key()).is_err());
    }

    #[test]
    fn test_first_marker_has_empty_previous() {
        let payload = marker(None).signing_payload();
        assert!(payload.starts_with(&format!("{}::a1:", hash_hex(&[2; 32]))));
        assert!(marker(None).is_first());
    }
}
