//! Error types for the write-marker ledger

use shared_types::KVStoreError;
use thiserror::Error;

use crate::domain::marker::MarkerStatus;

/// Write-marker ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The marker does not extend the allocation's current root, or another
    /// writer extended it first.
    #[error("Sequence conflict on {allocation_id}: allocation root is {current}, marker extends {previous}")]
    SequenceConflict {
        /// Allocation
        allocation_id: String,
        /// Persisted allocation root (`-` when empty)
        current: String,
        /// Marker's previous root (`-` when empty)
        previous: String,
    },

    /// No marker with this root.
    #[error("Write marker not found: {root}")]
    NotFound {
        /// Hex root
        root: String,
    },

    /// The allocation is unknown to this blobber.
    #[error("Allocation not found: {0}")]
    AllocationNotFound(String),

    /// Structurally invalid marker.
    #[error("Invalid write marker: {0}")]
    InvalidMarker(String),

    /// A transition was attempted on a marker that left `Pending`.
    #[error("Write marker {root} is {status}, not pending")]
    NotPending {
        /// Hex root
        root: String,
        /// Current status
        status: MarkerStatus,
    },

    /// An earlier marker of the allocation is still pending, or the redeemed
    /// pointer is not at the last committed predecessor.
    #[error("Write marker #{sequence} of {allocation_id} is not next in line for redemption")]
    OutOfOrder {
        /// Allocation
        allocation_id: String,
        /// Sequence of the refused marker
        sequence: u64,
    },

    /// The redeemed pointer or the marker record changed underneath a
    /// transition.
    #[error("Concurrent update on {allocation_id}: {key}")]
    Concurrent {
        /// Allocation
        allocation_id: String,
        /// Key whose guard failed
        key: String,
    },

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),
}

impl LedgerError {
    /// Conflicts are reported to the caller; never retried here.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::SequenceConflict { .. }
                | LedgerError::OutOfOrder { .. }
                | LedgerError::Concurrent { .. }
        )
    }
}
