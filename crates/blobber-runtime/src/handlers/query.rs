//! # Storage Queries
//!
//! Read-only views over allocations, reference trees and write markers.
//! Access rules:
//!
//! | Query              | Caller            |
//! |--------------------|-------------------|
//! | allocation details | anyone            |
//! | file meta          | owner or payer    |
//! | reference path     | owner or payer    |
//! | list entities      | owner             |
//! | object tree        | owner             |
//! | calculate hash     | owner             |
//! | marker status      | anyone            |

use std::sync::Arc;

use bl_02_reference_tree::{ReferenceNode, TreeError, TreeStore};
use bl_04_write_marker_ledger::{
    LedgerError, MarkerLedger, MarkerStatus, WriteMarkerEntity, WriteMarkerLedger,
};
use serde::Serialize;
use shared_types::{
    hash_hex, Allocation, AllocationRepository, AllocationState, Hash, KVStoreError, TimeSource,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Allocation not found: {0}")]
    AllocationNotFound(String),

    #[error("Allocation {0} has expired")]
    AllocationExpired(String),

    #[error("{client} may not read allocation {allocation_id}")]
    Unauthorized {
        client: String,
        allocation_id: String,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] KVStoreError),
}

/// A directory and its immediate children.
#[derive(Clone, Debug, Serialize)]
pub struct Listing {
    pub allocation_root: Option<Hash>,
    pub meta: ReferenceNode,
    pub entities: Vec<ReferenceNode>,
}

/// Root-to-target chain of nodes plus the latest marker.
#[derive(Clone, Debug)]
pub struct ReferencePath {
    pub nodes: Vec<ReferenceNode>,
    pub latest_write_marker: Option<WriteMarkerEntity>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TreeEntry {
    pub node: ReferenceNode,
    pub children: Vec<TreeEntry>,
}

impl TreeEntry {
    /// Number of nodes in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TreeEntry::count).sum::<usize>()
    }
}

#[derive(Clone, Debug)]
pub struct ObjectTree {
    pub tree: TreeEntry,
    pub latest_write_marker: Option<WriteMarkerEntity>,
}

#[derive(Clone, Debug, Default)]
pub struct LatestMarkers {
    pub latest: Option<WriteMarkerEntity>,
    pub latest_redeemed: Option<WriteMarkerEntity>,
}

pub struct StorageQueryHandler {
    allocations: AllocationRepository,
    trees: Arc<TreeStore>,
    ledger: Arc<WriteMarkerLedger>,
    time: Arc<dyn TimeSource>,
}

impl StorageQueryHandler {
    pub fn new(
        allocations: AllocationRepository,
        trees: Arc<TreeStore>,
        ledger: Arc<WriteMarkerLedger>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            allocations,
            trees,
            ledger,
            time,
        }
    }

    fn allocation(&self, allocation_id: &str) -> Result<Allocation, QueryError> {
        let allocation = self
            .allocations
            .get(allocation_id)?
            .ok_or_else(|| QueryError::AllocationNotFound(allocation_id.to_string()))?;
        if allocation.is_expired(self.time.now()) {
            return Err(QueryError::AllocationExpired(allocation_id.to_string()));
        }
        Ok(allocation)
    }

    fn for_owner(&self, allocation_id: &str, client: &str) -> Result<Allocation, QueryError> {
        let allocation = self.allocation(allocation_id)?;
        if allocation.owner_id != client {
            return Err(unauthorized(client, allocation_id));
        }
        Ok(allocation)
    }

    fn for_reader(&self, allocation_id: &str, client: &str) -> Result<Allocation, QueryError> {
        let allocation = self.allocation(allocation_id)?;
        if !allocation.is_owner_or_payer(client) {
            return Err(unauthorized(client, allocation_id));
        }
        Ok(allocation)
    }

    /// Allocation record with its root fields. Expired allocations are
    /// reported as such.
    pub fn allocation_details(&self, allocation_id: &str) -> Result<AllocationState, QueryError> {
        self.allocation(allocation_id)?;
        self.allocations
            .state(allocation_id)?
            .ok_or_else(|| QueryError::AllocationNotFound(allocation_id.to_string()))
    }

    /// Metadata of the file at `lookup_hash`.
    pub fn file_meta(
        &self,
        allocation_id: &str,
        client: &str,
        lookup_hash: &Hash,
    ) -> Result<ReferenceNode, QueryError> {
        self.for_reader(allocation_id, client)?;
        let node = self.trees.resolve_by_lookup_hash(allocation_id, lookup_hash)?;
        if !node.is_file() {
            return Err(TreeError::NotAFile { path: node.path }.into());
        }
        Ok(node)
    }

    /// A directory and its immediate children.
    pub fn list_entities(
        &self,
        allocation_id: &str,
        client: &str,
        path: &str,
    ) -> Result<Listing, QueryError> {
        self.for_owner(allocation_id, client)?;
        let meta = self.trees.resolve(allocation_id, path)?;
        let entities = self.trees.list_children(&meta)?;
        Ok(Listing {
            allocation_root: self.allocations.root(allocation_id)?,
            meta,
            entities,
        })
    }

    pub fn reference_path(
        &self,
        allocation_id: &str,
        client: &str,
        path: &str,
    ) -> Result<ReferencePath, QueryError> {
        self.for_reader(allocation_id, client)?;
        Ok(ReferencePath {
            nodes: self.trees.reference_path(allocation_id, path)?,
            latest_write_marker: self.ledger.latest(allocation_id)?,
        })
    }

    /// Everything under `path`, nested.
    pub fn object_tree(
        &self,
        allocation_id: &str,
        client: &str,
        path: &str,
    ) -> Result<ObjectTree, QueryError> {
        self.for_owner(allocation_id, client)?;
        let node = self.trees.resolve(allocation_id, path)?;
        Ok(ObjectTree {
            tree: self.entry(node)?,
            latest_write_marker: self.ledger.latest(allocation_id)?,
        })
    }

    fn entry(&self, node: ReferenceNode) -> Result<TreeEntry, QueryError> {
        let children = self
            .trees
            .list_children(&node)?
            .into_iter()
            .map(|child| self.entry(child))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TreeEntry { node, children })
    }

    /// Recompute hashes under each of `paths` and persist the result.
    /// Returns the allocation's tree root afterwards.
    pub fn calculate_hash(
        &self,
        allocation_id: &str,
        client: &str,
        paths: &[&str],
    ) -> Result<Hash, QueryError> {
        self.for_owner(allocation_id, client)?;
        let mut root = self.trees.resolve(allocation_id, "/")?.hash;
        for path in paths {
            root = self.trees.recompute_hashes(allocation_id, path, true)?;
        }
        debug!(
            "[runtime] Hash recalculation on {} ({} paths) -> {}",
            allocation_id,
            paths.len(),
            hash_hex(&root)
        );
        Ok(root)
    }

    pub fn marker_status(&self, allocation_root: &Hash) -> Result<MarkerStatus, QueryError> {
        Ok(self.ledger.status(allocation_root)?)
    }

    pub fn latest_markers(&self, allocation_id: &str) -> Result<LatestMarkers, QueryError> {
        self.allocation(allocation_id)?;
        Ok(LatestMarkers {
            latest: self.ledger.latest(allocation_id)?,
            latest_redeemed: self.ledger.latest_redeemed(allocation_id)?,
        })
    }
}

fn unauthorized(client: &str, allocation_id: &str) -> QueryError {
    QueryError::Unauthorized {
        client: client.to_string(),
        allocation_id: allocation_id.to_string(),
    }
}
