//! # Inbound Port
//!
//! What session commit and the redemption scheduler call. The scheduler only
//! sees this trait, so tests can interpose faults between chain confirmation
//! and the local commit.

use shared_types::{BatchOperation, Hash};

use crate::domain::marker::{MarkerStatus, WriteMarker, WriteMarkerEntity};
use crate::error::LedgerError;

pub trait MarkerLedger: Send + Sync {
    /// Record a marker that extends the allocation's current root.
    fn create(&self, marker: WriteMarker) -> Result<WriteMarkerEntity, LedgerError> {
        self.create_with(marker, Vec::new())
    }

    /// Record a marker together with `staged` writes (tree rows, consumed
    /// change rows) in one guarded batch.
    fn create_with(
        &self,
        marker: WriteMarker,
        staged: Vec<BatchOperation>,
    ) -> Result<WriteMarkerEntity, LedgerError>;

    /// Latest marker recorded with this root.
    fn get(&self, allocation_root: &Hash) -> Result<WriteMarkerEntity, LedgerError>;

    fn status(&self, allocation_root: &Hash) -> Result<MarkerStatus, LedgerError> {
        Ok(self.get(allocation_root)?.status)
    }

    /// Pending markers of an allocation, by sequence.
    fn pending(&self, allocation_id: &str) -> Result<Vec<WriteMarkerEntity>, LedgerError>;

    /// Current redeemed pointer of an allocation.
    fn redeemed_root(&self, allocation_id: &str) -> Result<Option<Hash>, LedgerError>;

    /// Whether `entity` is next in line: every earlier marker is terminal and
    /// the redeemed pointer sits at the last committed one. Failed markers
    /// are passed over.
    fn is_redeemable(&self, entity: &WriteMarkerEntity) -> Result<bool, LedgerError>;

    /// Remember the redemption transaction before waiting for it.
    fn mark_submitted(
        &self,
        entity: &WriteMarkerEntity,
        txn_hash: &str,
    ) -> Result<WriteMarkerEntity, LedgerError>;

    /// Count a confirmation round that ended without a verdict.
    fn record_unverified(
        &self,
        entity: &WriteMarkerEntity,
        reason: &str,
    ) -> Result<WriteMarkerEntity, LedgerError>;

    /// `Pending -> Committed` together with the redeemed pointer. Refused
    /// with `OutOfOrder` unless [`MarkerLedger::is_redeemable`] holds, and
    /// guarded on the pointer not moving in between.
    fn mark_committed(
        &self,
        entity: &WriteMarkerEntity,
        txn_hash: &str,
    ) -> Result<WriteMarkerEntity, LedgerError>;

    /// `Pending -> Failed`. Terminal.
    fn mark_failed(
        &self,
        entity: &WriteMarkerEntity,
        reason: &str,
    ) -> Result<WriteMarkerEntity, LedgerError>;

    /// Clear the redeem flag once no marker of the allocation is pending.
    /// Returns whether the flag is now clear.
    fn clear_redeem_required(&self, allocation_id: &str) -> Result<bool, LedgerError>;

    /// Allocations with the redeem flag set.
    fn allocations_requiring_redemption(&self) -> Result<Vec<String>, LedgerError>;
}
