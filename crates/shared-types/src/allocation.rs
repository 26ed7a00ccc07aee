//! # Allocation Repository
//!
//! Reads and writes the allocation record over its split key layout. The
//! static record lives under `a:`; the tree root, redeemed pointer and redeem
//! flag each have their own key so that a commit and a redemption never
//! overwrite each other's field.

use std::sync::Arc;

use crate::entities::{Allocation, Hash};
use crate::errors::KVStoreError;
use crate::keys;
use crate::storage::{decode, encode, KeyValueStore};

/// Full view of one allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationState {
    pub allocation: Allocation,
    /// Current tree root; `None` before the first commit.
    pub allocation_root: Option<Hash>,
    /// Root of the latest Committed write marker.
    pub latest_redeemed_write_marker: Option<Hash>,
    pub is_redeem_required: bool,
}

#[derive(Clone)]
pub struct AllocationRepository {
    store: Arc<dyn KeyValueStore>,
}

impl AllocationRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Insert or refresh the static record. Root fields are untouched.
    pub fn put(&self, allocation: &Allocation) -> Result<(), KVStoreError> {
        if !keys::is_valid_component(&allocation.id) {
            return Err(KVStoreError::InvalidKey {
                id: allocation.id.clone(),
                reason: "allocation id must be non-empty and contain no ':'".into(),
            });
        }
        self.store
            .put(&keys::allocation_key(&allocation.id), &encode(allocation)?)
    }

    pub fn get(&self, id: &str) -> Result<Option<Allocation>, KVStoreError> {
        self.store
            .get(&keys::allocation_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn state(&self, id: &str) -> Result<Option<AllocationState>, KVStoreError> {
        let Some(allocation) = self.get(id)? else {
            return Ok(None);
        };
        Ok(Some(AllocationState {
            allocation,
            allocation_root: self.root(id)?,
            latest_redeemed_write_marker: self.redeemed_root(id)?,
            is_redeem_required: self.is_redeem_required(id)?,
        }))
    }

    pub fn root(&self, id: &str) -> Result<Option<Hash>, KVStoreError> {
        read_hash(self.store.as_ref(), &keys::allocation_root_key(id))
    }

    pub fn redeemed_root(&self, id: &str) -> Result<Option<Hash>, KVStoreError> {
        read_hash(self.store.as_ref(), &keys::redeemed_root_key(id))
    }

    pub fn is_redeem_required(&self, id: &str) -> Result<bool, KVStoreError> {
        self.store.exists(&keys::redeem_required_key(id))
    }
}

/// Read a 32-byte hash value.
pub fn read_hash(store: &dyn KeyValueStore, key: &[u8]) -> Result<Option<Hash>, KVStoreError> {
    match store.get(key)? {
        None => Ok(None),
        Some(bytes) => bytes
            .try_into()
            .map(Some)
            .map_err(|_| KVStoreError::CorruptionError {
                message: format!("expected 32-byte hash at {}", String::from_utf8_lossy(key)),
            }),
    }
}
