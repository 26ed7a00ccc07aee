//! # Change Collector
//!
//! Persists the changes declared on a connection under
//! `c:{allocation}:{connection}:{index}`. Indices are zero-padded, so a prefix
//! scan returns changes in declaration order.

use std::sync::Arc;

use shared_types::keys::{change_key, is_valid_component, KeyPrefix};
use shared_types::{decode, encode, BatchOperation, Condition, KeyValueStore};
use tracing::{debug, info};

use crate::domain::change::AllocationChange;
use crate::error::ChangeError;

/// Attempts to claim an index before giving up on a racing writer.
const MAX_INDEX_ATTEMPTS: usize = 8;

pub struct ChangeCollector {
    store: Arc<dyn KeyValueStore>,
}

impl ChangeCollector {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn rows(
        &self,
        allocation_id: &str,
        connection_id: &str,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ChangeError> {
        check_ids(allocation_id, connection_id)?;
        let prefix = KeyPrefix::Change.scan_prefix(&[allocation_id, connection_id]);
        Ok(self.store.prefix_scan(&prefix)?)
    }

    fn next_index(&self, allocation_id: &str, connection_id: &str) -> Result<u32, ChangeError> {
        let rows = self.rows(allocation_id, connection_id)?;
        let last = rows
            .last()
            .and_then(|(key, _)| KeyPrefix::Change.strip(key))
            .and_then(|rest| rest.rsplit(':').next())
            .and_then(|idx| idx.parse::<u32>().ok());
        Ok(last.map_or(0, |i| i + 1))
    }

    /// Append a change to its connection. Returns the assigned index.
    pub fn add(&self, change: &AllocationChange) -> Result<u32, ChangeError> {
        check_ids(&change.allocation_id, &change.connection_id)?;
        let value = encode(change)?;
        for _ in 0..MAX_INDEX_ATTEMPTS {
            let index = self.next_index(&change.allocation_id, &change.connection_id)?;
            let key = change_key(&change.allocation_id, &change.connection_id, index);
            match self.store.compare_and_write(
                &[Condition::absent(key.clone())],
                vec![BatchOperation::put(key, value.clone())],
            ) {
                Ok(()) => {
                    debug!(
                        "[bl-03] Collected {} on {}/{} at #{}",
                        change.operation.kind(),
                        change.allocation_id,
                        change.connection_id,
                        index
                    );
                    return Ok(index);
                }
                Err(e) if e.is_condition_failed() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ChangeError::InvalidOperation(format!(
            "too many concurrent writers on connection {}",
            change.connection_id
        )))
    }

    /// Changes of a connection in declaration order.
    pub fn changes(
        &self,
        allocation_id: &str,
        connection_id: &str,
    ) -> Result<Vec<AllocationChange>, ChangeError> {
        self.rows(allocation_id, connection_id)?
            .into_iter()
            .map(|(_, bytes)| decode(&bytes).map_err(ChangeError::from))
            .collect()
    }

    /// Sum of the size deltas declared on a connection.
    pub fn total_size(&self, allocation_id: &str, connection_id: &str) -> Result<i64, ChangeError> {
        Ok(self
            .changes(allocation_id, connection_id)?
            .iter()
            .map(|c| c.size)
            .sum())
    }

    /// Deletes for every row of a connection, to be written with the commit.
    pub fn delete_ops(
        &self,
        allocation_id: &str,
        connection_id: &str,
    ) -> Result<Vec<BatchOperation>, ChangeError> {
        Ok(self
            .rows(allocation_id, connection_id)?
            .into_iter()
            .map(|(key, _)| BatchOperation::delete(key))
            .collect())
    }

    /// Drop a connection without applying it. Returns the discarded changes.
    pub fn discard(
        &self,
        allocation_id: &str,
        connection_id: &str,
    ) -> Result<Vec<AllocationChange>, ChangeError> {
        let changes = self.changes(allocation_id, connection_id)?;
        let ops = self.delete_ops(allocation_id, connection_id)?;
        if !ops.is_empty() {
            self.store.atomic_batch_write(ops)?;
            info!(
                "[bl-03] Discarded {} changes on {}/{}",
                changes.len(),
                allocation_id,
                connection_id
            );
        }
        Ok(changes)
    }
}

/// Identifiers become key components; a `:` would let one connection's scan
/// reach into another's rows.
fn check_ids(allocation_id: &str, connection_id: &str) -> Result<(), ChangeError> {
    for (kind, id) in [("allocation", allocation_id), ("connection", connection_id)] {
        if !is_valid_component(id) {
            return Err(ChangeError::InvalidOperation(format!(
                "{} id {:?} must be non-empty and contain no ':'",
                kind, id
            )));
        }
    }
    Ok(())
}
