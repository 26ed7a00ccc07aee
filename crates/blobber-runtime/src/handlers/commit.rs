//! # Session Commit
//!
//! Closes an upload connection: every change declared on it is applied to a
//! working copy of the reference tree, the resulting root must equal the root
//! the client signed, and then the tree rows, the consumed change rows and
//! the write marker are written in one guarded batch.
//!
//! ```text
//! marker checks ─► load tree ─► apply_all ─► root == signed root?
//!                                                   │
//!        temp files ─► content ◄────────────────────┘
//!                         │
//!                         ▼
//!   create_with(marker, tree rows + change deletes)   guarded on `ar:{alloc}`
//! ```
//!
//! A failure before `create_with` leaves the persisted tree untouched.

use std::sync::Arc;

use bl_02_reference_tree::{TreeError, TreeStore};
use bl_03_allocation_changes::{
    AllocationChange, BlobError, BlobFile, BlobStore, ChangeCollector, ChangeError,
    ChangeProcessor,
};
use bl_04_write_marker_ledger::{LedgerError, MarkerLedger, WriteMarker, WriteMarkerEntity};
use shared_types::{
    hash_hex, root_hex, Allocation, AllocationRepository, IdentityError, KVStoreError, TimeSource,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Session commit failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("Allocation not found: {0}")]
    AllocationNotFound(String),

    #[error("Allocation {0} has expired")]
    AllocationExpired(String),

    /// The marker does not belong to this blobber or allocation owner.
    #[error("Invalid write marker: {0}")]
    InvalidMarker(String),

    #[error("Write marker signature rejected: {0}")]
    BadSignature(#[from] IdentityError),

    /// The marker extends a root other than the allocation's current one.
    #[error("Stale write marker: allocation root is {current}, marker extends {previous}")]
    StaleRoot { current: String, previous: String },

    #[error("Size mismatch: marker declares {marker}, connection holds {changes}")]
    SizeMismatch { marker: i64, changes: i64 },

    /// Applying the connection produced a different root than was signed.
    #[error("Allocation root mismatch: computed {computed}, signed {signed}")]
    RootMismatch { computed: String, signed: String },

    #[error("No changes on connection {0}")]
    NoChanges(String),

    #[error(transparent)]
    Change(#[from] ChangeError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Store(#[from] KVStoreError),
}

/// A committed connection.
#[derive(Clone, Debug)]
pub struct CommitResult {
    /// The recorded marker, `Pending` until redeemed.
    pub entity: WriteMarkerEntity,
    pub changes: usize,
    /// Content hashes queued for removal.
    pub released: Vec<String>,
}

pub struct CommitHandler {
    blobber_id: String,
    allocations: AllocationRepository,
    trees: Arc<TreeStore>,
    collector: Arc<ChangeCollector>,
    processor: Arc<ChangeProcessor>,
    ledger: Arc<dyn MarkerLedger>,
    blobs: Arc<dyn BlobStore>,
    time: Arc<dyn TimeSource>,
}

impl CommitHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        blobber_id: impl Into<String>,
        allocations: AllocationRepository,
        trees: Arc<TreeStore>,
        collector: Arc<ChangeCollector>,
        processor: Arc<ChangeProcessor>,
        ledger: Arc<dyn MarkerLedger>,
        blobs: Arc<dyn BlobStore>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            blobber_id: blobber_id.into(),
            allocations,
            trees,
            collector,
            processor,
            ledger,
            blobs,
            time,
        }
    }

    /// Record a change on its connection, storing upload bytes as a temp
    /// file first. Returns the change's index on the connection.
    pub async fn declare(
        &self,
        change: &AllocationChange,
        data: Option<&[u8]>,
    ) -> Result<u32, CommitError> {
        self.live_allocation(&change.allocation_id)?;
        if let (Some(upload), Some(bytes)) = (change.operation.upload(), data) {
            self.blobs
                .write_temp(
                    &change.allocation_id,
                    &BlobFile::from(upload),
                    &change.connection_id,
                    bytes,
                )
                .await?;
        }
        Ok(self.collector.add(change)?)
    }

    /// Apply and record every change of `connection_id` under `marker`.
    pub async fn commit(
        &self,
        connection_id: &str,
        marker: WriteMarker,
    ) -> Result<CommitResult, CommitError> {
        let alloc_id = marker.allocation_id.clone();
        let allocation = self.live_allocation(&alloc_id)?;

        if marker.blobber_id != self.blobber_id {
            return Err(CommitError::InvalidMarker(format!(
                "marker is for blobber {}",
                marker.blobber_id
            )));
        }
        if marker.client_id != allocation.owner_id {
            return Err(CommitError::InvalidMarker(format!(
                "{} does not own allocation {}",
                marker.client_id, alloc_id
            )));
        }
        if marker.timestamp > allocation.expiration {
            return Err(CommitError::InvalidMarker(
                "marker timestamp is past allocation expiration".into(),
            ));
        }
        marker.verify(&allocation.owner_public_key)?;

        let current = self.allocations.root(&alloc_id)?;
        if current != marker.previous_allocation_root {
            return Err(CommitError::StaleRoot {
                current: root_hex(&current),
                previous: root_hex(&marker.previous_allocation_root),
            });
        }

        let changes = self.collector.changes(&alloc_id, connection_id)?;
        if changes.is_empty() {
            return Err(CommitError::NoChanges(connection_id.to_string()));
        }
        let total: i64 = changes.iter().map(|c| c.size).sum();
        if total != marker.size {
            return Err(CommitError::SizeMismatch {
                marker: marker.size,
                changes: total,
            });
        }

        let mut tree = self.trees.load(&alloc_id)?;
        let applied = self
            .processor
            .apply_all(&mut tree, &changes, marker.allocation_root)?;
        if applied.root_hash() != marker.allocation_root {
            return Err(CommitError::RootMismatch {
                computed: hash_hex(&applied.root_hash()),
                signed: hash_hex(&marker.allocation_root),
            });
        }

        for change in &changes {
            if let Some(upload) = change.operation.upload() {
                self.move_to_content(&alloc_id, &BlobFile::from(upload), connection_id)
                    .await?;
            }
        }

        let mut staged = tree.staged_operations()?;
        staged.extend(self.collector.delete_ops(&alloc_id, connection_id)?);
        let entity = self.ledger.create_with(marker, staged)?;
        tree.mark_persisted();
        self.processor.release(&alloc_id, &applied);

        info!(
            "[runtime] Committed connection {} on {}: {} changes, marker #{} {}",
            connection_id,
            alloc_id,
            changes.len(),
            entity.sequence,
            hash_hex(&entity.root())
        );
        Ok(CommitResult {
            entity,
            changes: changes.len(),
            released: applied.released,
        })
    }

    /// Drop a connection without committing it. Returns the number of
    /// discarded changes.
    pub fn discard(&self, allocation_id: &str, connection_id: &str) -> Result<usize, CommitError> {
        let changes = self.collector.discard(allocation_id, connection_id)?;
        self.processor.discard_uploads(&changes);
        Ok(changes.len())
    }

    fn live_allocation(&self, allocation_id: &str) -> Result<Allocation, CommitError> {
        let allocation = self
            .allocations
            .get(allocation_id)?
            .ok_or_else(|| CommitError::AllocationNotFound(allocation_id.to_string()))?;
        if allocation.is_expired(self.time.now()) {
            return Err(CommitError::AllocationExpired(allocation_id.to_string()));
        }
        Ok(allocation)
    }

    /// Move one upload into content. A retry after a failed ledger write
    /// finds the temp file gone and the content already in place.
    async fn move_to_content(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
    ) -> Result<(), CommitError> {
        match self.blobs.commit_write(allocation_id, file, connection_id).await {
            Ok(()) => Ok(()),
            Err(e @ BlobError::TempNotFound { .. }) => {
                if self.blobs.has_content(allocation_id, &file.content_hash).await? {
                    debug!(
                        "[runtime] {} already committed as {}",
                        file.path, file.content_hash
                    );
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
            Err(e) => {
                warn!("[runtime] Committing {} failed: {}", file.path, e);
                Err(e.into())
            }
        }
    }
}
