//! # Write-Marker Ledger Service
//!
//! Every transition is one `compare_and_write`:
//!
//! | Operation            | Guards                          | Writes                              |
//! |----------------------|---------------------------------|-------------------------------------|
//! | `create_with`        | `ar` = previous, `ws` = read    | staged, `wm`, `ws`, `wr`, `ar`, `rr`|
//! | `mark_submitted` etc | `wm` = read bytes               | `wm`                                |
//! | `mark_committed`     | `wm` = read bytes, `lr` = read  | `wm`, `lr`                          |
//! | `clear_redeem_...`   | `ws` = read, none pending       | delete `rr`                         |
//!
//! Redemption follows sequence order. A `Failed` marker is passed over: its
//! successor is redeemable once every earlier marker is terminal and `lr`
//! names the last committed one.

use std::sync::Arc;

use shared_types::keys::{self, KeyPrefix};
use shared_types::{
    decode, encode, hash_hex, root_hex, short_hex, AllocationRepository, BatchOperation,
    Condition, Hash, KVStoreError, KeyValueStore, TimeSource,
};
use tracing::{debug, info, warn};

use crate::domain::marker::{MarkerStatus, WriteMarker, WriteMarkerEntity};
use crate::error::LedgerError;
use crate::ports::MarkerLedger;

/// Present-value marker for the `rr:` flag.
const FLAG: &[u8] = &[1];

/// Ledger over the shared key-value store.
pub struct WriteMarkerLedger {
    store: Arc<dyn KeyValueStore>,
    allocations: AllocationRepository,
    time: Arc<dyn TimeSource>,
}

impl WriteMarkerLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            allocations: AllocationRepository::new(Arc::clone(&store)),
            store,
            time,
        }
    }

    /// Every marker of an allocation, by sequence.
    pub fn markers(&self, allocation_id: &str) -> Result<Vec<WriteMarkerEntity>, LedgerError> {
        let prefix = KeyPrefix::WriteMarker.scan_prefix(&[allocation_id]);
        self.store
            .prefix_scan(&prefix)?
            .into_iter()
            .map(|(_, bytes)| decode(&bytes).map_err(LedgerError::from))
            .collect()
    }

    pub fn by_sequence(
        &self,
        allocation_id: &str,
        sequence: u64,
    ) -> Result<Option<WriteMarkerEntity>, LedgerError> {
        self.store
            .get(&keys::marker_key(allocation_id, sequence))?
            .map(|bytes| decode(&bytes))
            .transpose()
            .map_err(LedgerError::from)
    }

    /// Most recently recorded marker.
    pub fn latest(&self, allocation_id: &str) -> Result<Option<WriteMarkerEntity>, LedgerError> {
        match self.sequence(allocation_id)? {
            (0, _) => Ok(None),
            (seq, _) => self.by_sequence(allocation_id, seq),
        }
    }

    /// Marker the redeemed pointer refers to.
    pub fn latest_redeemed(
        &self,
        allocation_id: &str,
    ) -> Result<Option<WriteMarkerEntity>, LedgerError> {
        match self.allocations.redeemed_root(allocation_id)? {
            Some(root) => self.get(&root).map(Some),
            None => Ok(None),
        }
    }

    /// Last assigned sequence and its raw bytes (for the guard).
    fn sequence(&self, allocation_id: &str) -> Result<(u64, Option<Vec<u8>>), LedgerError> {
        let raw = self.store.get(&keys::marker_sequence_key(allocation_id))?;
        let seq = match &raw {
            None => 0,
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    KVStoreError::CorruptionError {
                        message: format!("bad sequence counter for {}", allocation_id),
                    }
                })?;
                u64::from_be_bytes(arr)
            }
        };
        Ok((seq, raw))
    }

    /// Pointer value `entity` must find before it can commit, or `None` when
    /// an earlier marker is still pending.
    fn expected_pointer(
        &self,
        entity: &WriteMarkerEntity,
    ) -> Result<Option<Option<Hash>>, LedgerError> {
        let alloc = &entity.marker.allocation_id;
        let mut expected = None;
        for earlier in self.markers(alloc)? {
            if earlier.sequence >= entity.sequence {
                break;
            }
            match earlier.status {
                MarkerStatus::Pending => return Ok(None),
                MarkerStatus::Committed => expected = Some(earlier.root()),
                MarkerStatus::Failed => {}
            }
        }
        Ok(Some(expected))
    }

    /// Read-modify-write of one Pending marker record.
    fn transition(
        &self,
        entity: &WriteMarkerEntity,
        extra_conditions: Vec<Condition>,
        extra_ops: Vec<BatchOperation>,
        apply: impl FnOnce(&mut WriteMarkerEntity),
    ) -> Result<WriteMarkerEntity, LedgerError> {
        let alloc = &entity.marker.allocation_id;
        let key = keys::marker_key(alloc, entity.sequence);
        let current_bytes = self
            .store
            .get(&key)?
            .ok_or_else(|| LedgerError::NotFound {
                root: hash_hex(&entity.root()),
            })?;
        let mut current: WriteMarkerEntity = decode(&current_bytes)?;
        if !current.is_pending() {
            return Err(LedgerError::NotPending {
                root: hash_hex(&current.root()),
                status: current.status,
            });
        }

        apply(&mut current);
        current.updated_at = self.time.now();

        let mut conditions = vec![Condition::equals(key.clone(), current_bytes)];
        conditions.extend(extra_conditions);
        let mut ops = vec![BatchOperation::put(key, encode(&current)?)];
        ops.extend(extra_ops);

        match self.store.compare_and_write(&conditions, ops) {
            Ok(()) => Ok(current),
            Err(KVStoreError::ConditionFailed { key }) => Err(LedgerError::Concurrent {
                allocation_id: alloc.clone(),
                key,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl MarkerLedger for WriteMarkerLedger {
    fn create_with(
        &self,
        marker: WriteMarker,
        staged: Vec<BatchOperation>,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        let alloc = marker.allocation_id.clone();
        if marker.previous_allocation_root == Some(marker.allocation_root) {
            return Err(LedgerError::InvalidMarker(
                "allocation root equals previous root".into(),
            ));
        }
        if self.allocations.get(&alloc)?.is_none() {
            return Err(LedgerError::AllocationNotFound(alloc));
        }

        let previous = marker.previous_allocation_root;
        let conflict = |current: &Option<Hash>| LedgerError::SequenceConflict {
            allocation_id: alloc.clone(),
            current: root_hex(current),
            previous: root_hex(&previous),
        };

        let current_root = self.allocations.root(&alloc)?;
        if current_root != previous {
            return Err(conflict(&current_root));
        }
        let (last_seq, raw_seq) = self.sequence(&alloc)?;
        let sequence = last_seq + 1;

        let now = self.time.now();
        let entity = WriteMarkerEntity {
            marker,
            sequence,
            status: MarkerStatus::Pending,
            status_message: String::new(),
            close_txn_id: None,
            redeem_attempts: 0,
            unverified_rounds: 0,
            txn_rounds: 0,
            created_at: now,
            updated_at: now,
        };
        let root = entity.root();

        let conditions = [
            Condition::matches(
                keys::allocation_root_key(&alloc),
                current_root.as_ref().map(|h| h.as_slice()),
            ),
            Condition::matches(keys::marker_sequence_key(&alloc), raw_seq.as_deref()),
        ];
        let mut ops = staged;
        ops.extend([
            BatchOperation::put(keys::marker_key(&alloc, sequence), encode(&entity)?),
            BatchOperation::put(
                keys::marker_sequence_key(&alloc),
                sequence.to_be_bytes().to_vec(),
            ),
            BatchOperation::put(keys::marker_root_key(&root), encode(&(alloc.clone(), sequence))?),
            BatchOperation::put(keys::allocation_root_key(&alloc), root.to_vec()),
            BatchOperation::put(keys::redeem_required_key(&alloc), FLAG.to_vec()),
        ]);

        match self.store.compare_and_write(&conditions, ops) {
            Ok(()) => {
                info!(
                    "[bl-04] Recorded write marker #{} for {}: {} -> {}",
                    sequence,
                    alloc,
                    root_hex(&previous),
                    hash_hex(&root)
                );
                Ok(entity)
            }
            Err(e) if e.is_condition_failed() => {
                let now_root = self.allocations.root(&alloc)?;
                warn!(
                    "[bl-04] Lost race recording marker for {} (root now {})",
                    alloc,
                    root_hex(&now_root)
                );
                Err(conflict(&now_root))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, allocation_root: &Hash) -> Result<WriteMarkerEntity, LedgerError> {
        let not_found = || LedgerError::NotFound {
            root: hash_hex(allocation_root),
        };
        let Some(index) = self.store.get(&keys::marker_root_key(allocation_root))? else {
            return Err(not_found());
        };
        let (alloc, sequence): (String, u64) = decode(&index)?;
        self.by_sequence(&alloc, sequence)?.ok_or_else(not_found)
    }

    fn pending(&self, allocation_id: &str) -> Result<Vec<WriteMarkerEntity>, LedgerError> {
        Ok(self
            .markers(allocation_id)?
            .into_iter()
            .filter(WriteMarkerEntity::is_pending)
            .collect())
    }

    fn redeemed_root(&self, allocation_id: &str) -> Result<Option<Hash>, LedgerError> {
        Ok(self.allocations.redeemed_root(allocation_id)?)
    }

    fn is_redeemable(&self, entity: &WriteMarkerEntity) -> Result<bool, LedgerError> {
        let Some(expected) = self.expected_pointer(entity)? else {
            return Ok(false);
        };
        Ok(self.allocations.redeemed_root(&entity.marker.allocation_id)? == expected)
    }

    fn mark_submitted(
        &self,
        entity: &WriteMarkerEntity,
        txn_hash: &str,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        let updated = self.transition(entity, Vec::new(), Vec::new(), |e| {
            e.close_txn_id = Some(txn_hash.to_string());
            e.redeem_attempts += 1;
            e.txn_rounds = 0;
            e.status_message = "submitted".into();
        })?;
        debug!(
            "[bl-04] Marker #{} of {} submitted as {}",
            updated.sequence, updated.marker.allocation_id, txn_hash
        );
        Ok(updated)
    }

    fn record_unverified(
        &self,
        entity: &WriteMarkerEntity,
        reason: &str,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        self.transition(entity, Vec::new(), Vec::new(), |e| {
            e.unverified_rounds += 1;
            e.txn_rounds += 1;
            e.status_message = reason.to_string();
        })
    }

    fn mark_committed(
        &self,
        entity: &WriteMarkerEntity,
        txn_hash: &str,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        let alloc = &entity.marker.allocation_id;
        let root = entity.root();
        let redeemed = self.allocations.redeemed_root(alloc)?;
        if self.expected_pointer(entity)? != Some(redeemed) {
            return Err(LedgerError::OutOfOrder {
                allocation_id: alloc.clone(),
                sequence: entity.sequence,
            });
        }
        let pointer_guard = Condition::matches(
            keys::redeemed_root_key(alloc),
            redeemed.as_ref().map(|h| h.as_slice()),
        );
        let pointer_update = BatchOperation::put(keys::redeemed_root_key(alloc), root.to_vec());

        let updated = self.transition(entity, vec![pointer_guard], vec![pointer_update], |e| {
            e.status = MarkerStatus::Committed;
            e.close_txn_id = Some(txn_hash.to_string());
            e.unverified_rounds = 0;
            e.status_message = "committed".into();
        })?;
        info!(
            "[bl-04] Marker #{} of {} committed, redeemed pointer -> {}",
            updated.sequence,
            alloc,
            short_hex(&root)
        );
        Ok(updated)
    }

    fn mark_failed(
        &self,
        entity: &WriteMarkerEntity,
        reason: &str,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        let updated = self.transition(entity, Vec::new(), Vec::new(), |e| {
            e.status = MarkerStatus::Failed;
            e.status_message = reason.to_string();
        })?;
        warn!(
            "[bl-04] Marker #{} of {} failed: {}",
            updated.sequence, updated.marker.allocation_id, reason
        );
        Ok(updated)
    }

    fn clear_redeem_required(&self, allocation_id: &str) -> Result<bool, LedgerError> {
        if !self.allocations.is_redeem_required(allocation_id)? {
            return Ok(true);
        }
        let (last_seq, raw_seq) = self.sequence(allocation_id)?;
        if !self.pending(allocation_id)?.is_empty() {
            return Ok(false);
        }

        let conditions = [Condition::matches(
            keys::marker_sequence_key(allocation_id),
            raw_seq.as_deref(),
        )];
        let ops = vec![BatchOperation::delete(keys::redeem_required_key(
            allocation_id,
        ))];
        match self.store.compare_and_write(&conditions, ops) {
            Ok(()) => {
                debug!(
                    "[bl-04] {} settled through marker #{} (redeemed {})",
                    allocation_id,
                    last_seq,
                    root_hex(&self.allocations.redeemed_root(allocation_id)?)
                );
                Ok(true)
            }
            // A new marker was recorded in between; the flag stays.
            Err(e) if e.is_condition_failed() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn allocations_requiring_redemption(&self) -> Result<Vec<String>, LedgerError> {
        let prefix = KeyPrefix::RedeemRequired.as_bytes();
        Ok(self
            .store
            .prefix_scan(prefix)?
            .into_iter()
            .filter_map(|(key, _)| KeyPrefix::RedeemRequired.strip(&key).map(str::to_string))
            .collect())
    }
}
