//! # Tree Store
//!
//! Persistence-facing API of the reference tree. Single-node reads go straight
//! to the key-value store by lookup hash; mutations load a [`ReferenceTree`]
//! working copy and write it back as one batch.

use std::sync::Arc;

use shared_types::keys::{allocation_root_key, reference_key, KeyPrefix};
use shared_types::{
    decode, hash_hex, short_hex, Condition, Hash, HashStrategy, KeyValueStore, TimeSource,
};
use tracing::{debug, info, warn};

use crate::domain::node::ReferenceNode;
use crate::domain::path::{self, ROOT_PATH};
use crate::domain::tree::ReferenceTree;
use crate::error::TreeError;

/// Reference tree persistence and queries.
pub struct TreeStore {
    store: Arc<dyn KeyValueStore>,
    strategy: Arc<dyn HashStrategy>,
    time: Arc<dyn TimeSource>,
}

impl TreeStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        strategy: Arc<dyn HashStrategy>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            store,
            strategy,
            time,
        }
    }

    pub fn strategy(&self) -> Arc<dyn HashStrategy> {
        Arc::clone(&self.strategy)
    }

    /// Load the whole tree of an allocation into a working copy.
    pub fn load(&self, allocation_id: &str) -> Result<ReferenceTree, TreeError> {
        let prefix = KeyPrefix::Reference.scan_prefix(&[allocation_id]);
        let nodes = self
            .store
            .prefix_scan(&prefix)?
            .into_iter()
            .map(|(_, bytes)| decode::<ReferenceNode>(&bytes))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "[bl-02] Loaded {} reference nodes for {}",
            nodes.len(),
            allocation_id
        );
        ReferenceTree::from_nodes(
            allocation_id,
            Arc::clone(&self.strategy),
            nodes,
            self.time.now(),
        )
    }

    /// Write every staged change of `tree` in one atomic batch.
    pub fn persist(&self, tree: &mut ReferenceTree) -> Result<(), TreeError> {
        let ops = tree.staged_operations()?;
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len();
        self.store.atomic_batch_write(ops)?;
        tree.mark_persisted();
        debug!(
            "[bl-02] Persisted {} reference rows for {}",
            count,
            tree.allocation_id()
        );
        Ok(())
    }

    fn read(&self, allocation_id: &str, id: &Hash) -> Result<Option<ReferenceNode>, TreeError> {
        self.store
            .get(&reference_key(allocation_id, id))?
            .map(|bytes| decode(&bytes))
            .transpose()
            .map_err(TreeError::from)
    }

    fn read_root(&self, allocation_id: &str) -> Result<ReferenceNode, TreeError> {
        let id = self.strategy.lookup_hash(allocation_id, ROOT_PATH);
        match self.read(allocation_id, &id)? {
            Some(root) => Ok(root),
            // Nothing committed yet: the allocation has an empty root.
            None => Ok(ReferenceTree::new(allocation_id, Arc::clone(&self.strategy), self.time.now())
                .root()
                .clone()),
        }
    }

    /// Resolve a path without loading the tree.
    pub fn resolve(&self, allocation_id: &str, path: &str) -> Result<ReferenceNode, TreeError> {
        let path = path::normalize(path)?;
        if path == ROOT_PATH {
            return self.read_root(allocation_id);
        }

        let id = self.strategy.lookup_hash(allocation_id, &path);
        if let Some(node) = self.read(allocation_id, &id)? {
            return Ok(node);
        }

        // Classify the miss by looking at the immediate parent.
        let parent_path = path::parent(&path).unwrap_or(ROOT_PATH);
        let parent = if parent_path == ROOT_PATH {
            Some(self.read_root(allocation_id)?)
        } else {
            let parent_id = self.strategy.lookup_hash(allocation_id, parent_path);
            self.read(allocation_id, &parent_id)?
        };
        match parent {
            Some(p) if p.is_dir() => Err(TreeError::NotFound { path }),
            _ => Err(TreeError::InvalidReferencePath { path }),
        }
    }

    pub fn resolve_by_lookup_hash(
        &self,
        allocation_id: &str,
        id: &Hash,
    ) -> Result<ReferenceNode, TreeError> {
        self.read(allocation_id, id)?
            .ok_or_else(|| TreeError::NotFound {
                path: shared_types::hash_hex(id),
            })
    }

    /// Children of a directory in name order.
    pub fn list_children(&self, node: &ReferenceNode) -> Result<Vec<ReferenceNode>, TreeError> {
        let Some(children) = node.children() else {
            return Ok(Vec::new());
        };
        children
            .values()
            .map(|id| {
                self.read(&node.allocation_id, id)?.ok_or_else(|| {
                    TreeError::Corrupt(format!("{} lists a missing child", node.path))
                })
            })
            .collect()
    }

    /// Every directory from the root down to `path`, then `path` itself.
    pub fn reference_path(
        &self,
        allocation_id: &str,
        path: &str,
    ) -> Result<Vec<ReferenceNode>, TreeError> {
        let path = path::normalize(path)?;
        path::ancestry(&path)
            .iter()
            .map(|p| self.resolve(allocation_id, p))
            .collect()
    }

    /// Recompute hashes at `path` (and, with `recursive`, everything below)
    /// up to the root, persist the result, and return the root hash.
    ///
    /// The write is guarded on the allocation root read before loading, so a
    /// commit landing in between is never overwritten. A recomputed root that
    /// differs from the committed one is reported and nothing is written.
    pub fn recompute_hashes(
        &self,
        allocation_id: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Hash, TreeError> {
        let root_key = allocation_root_key(allocation_id);
        let committed = self.store.get(&root_key)?;

        let mut tree = self.load(allocation_id)?;
        let id = tree.resolve(path)?.lookup_hash;
        let root = tree.recompute_hashes(&id, recursive)?;

        if let Some(bytes) = &committed {
            if bytes.as_slice() != root.as_slice() {
                warn!(
                    "[bl-02] Recomputed root of {} diverges from committed root {}",
                    allocation_id,
                    hex::encode(bytes)
                );
                return Err(TreeError::RootDiverged {
                    allocation_id: allocation_id.to_string(),
                    committed: hex::encode(bytes),
                    computed: hash_hex(&root),
                });
            }
        }

        let ops = tree.staged_operations()?;
        if ops.is_empty() {
            return Ok(root);
        }
        let guard = Condition::matches(root_key, committed.as_deref());
        match self.store.compare_and_write(&[guard], ops) {
            Ok(()) => {}
            Err(e) if e.is_condition_failed() => {
                return Err(TreeError::Concurrent {
                    allocation_id: allocation_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        tree.mark_persisted();
        info!(
            "[bl-02] Recomputed hashes for {}:{} -> {}",
            allocation_id,
            path,
            short_hex(&root)
        );
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::FileMeta;
    use shared_types::{
        BatchOperation, InMemoryKVStore, KVStoreError, ManualTimeSource, Sha256Strategy,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    fn store() -> (Arc<InMemoryKVStore>, TreeStore) {
        let kv = Arc::new(InMemoryKVStore::new());
        let trees = TreeStore::new(
            kv.clone(),
            Arc::new(Sha256Strategy),
            Arc::new(ManualTimeSource::new(50)),
        );
        (kv, trees)
    }

    fn seed(trees: &TreeStore) -> Hash {
        let mut tree = trees.load("a1").unwrap();
        tree.create_dir_all("/docs", 50).unwrap();
        let id = tree
            .insert_file(
                "/docs/a.txt",
                12,
                FileMeta {
                    content_hash: "c".into(),
                    ..Default::default()
                },
                50,
            )
            .unwrap();
        let root = tree.recompute_hashes(&id, false).unwrap();
        trees.persist(&mut tree).unwrap();
        root
    }

    #[test]
    fn test_persist_then_load_preserves_root() {
        let (_, trees) = store();
        let root = seed(&trees);
        assert_eq!(trees.load("a1").unwrap().root_hash(), root);
    }

    #[test]
    fn test_resolve_reads_by_lookup_hash() {
        let (_, trees) = store();
        seed(&trees);

        assert_eq!(trees.resolve("a1", "/docs/a.txt").unwrap().size, 12);
        assert!(matches!(
            trees.resolve("a1", "/docs/b.txt"),
            Err(TreeError::NotFound { .. })
        ));
        assert!(matches!(
            trees.resolve("a1", "/other/b.txt"),
            Err(TreeError::InvalidReferencePath { .. })
        ));
        assert!(matches!(
            trees.resolve("a1", "/docs/a.txt/x"),
            Err(TreeError::InvalidReferencePath { .. })
        ));
    }

    #[test]
    fn test_unknown_allocation_has_empty_root() {
        let (_, trees) = store();
        let root = trees.resolve("fresh", "/").unwrap();
        assert!(root.is_dir());
        assert_eq!(root.size, 0);
        assert!(matches!(
            trees.resolve("fresh", "/x"),
            Err(TreeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_children_and_reference_path() {
        let (_, trees) = store();
        seed(&trees);

        let root = trees.resolve("a1", "/").unwrap();
        let children = trees.list_children(&root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path, "/docs");

        let chain = trees.reference_path("a1", "/docs/a.txt").unwrap();
        let paths: Vec<_> = chain.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/docs", "/docs/a.txt"]);
    }

    #[test]
    fn test_recompute_on_consistent_tree_writes_nothing() {
        let (kv, trees) = store();
        let root = seed(&trees);
        let before = kv.snapshot();

        assert_eq!(trees.recompute_hashes("a1", "/", true).unwrap(), root);
        assert_eq!(kv.snapshot(), before);
    }

    #[test]
    fn test_unpersisted_changes_do_not_leak() {
        let (kv, trees) = store();
        seed(&trees);
        let before = kv.snapshot();

        let mut tree = trees.load("a1").unwrap();
        let id = tree.resolve("/docs/a.txt").unwrap().lookup_hash;
        tree.remove(&id).unwrap();
        drop(tree);

        assert_eq!(kv.snapshot(), before);
        assert!(trees.resolve("a1", "/docs/a.txt").is_ok());
    }

    #[test]
    fn test_recompute_refuses_root_that_diverges_from_commit() {
        let (kv, trees) = store();
        seed(&trees);
        kv.put(&allocation_root_key("a1"), &[7; 32]).unwrap();
        let before = kv.snapshot();

        let err = trees.recompute_hashes("a1", "/", true).unwrap_err();
        assert!(matches!(err, TreeError::RootDiverged { .. }));
        assert_eq!(kv.snapshot(), before);
    }

    /// Store that records a commit on the allocation right after the tree is
    /// loaded.
    struct CommitDuringLoad {
        inner: InMemoryKVStore,
        fired: AtomicBool,
    }

    impl KeyValueStore for CommitDuringLoad {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
            self.inner.get(key)
        }
        fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
            self.inner.put(key, value)
        }
        fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
            self.inner.delete(key)
        }
        fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
            self.inner.atomic_batch_write(operations)
        }
        fn compare_and_write(
            &self,
            conditions: &[Condition],
            operations: Vec<BatchOperation>,
        ) -> Result<(), KVStoreError> {
            self.inner.compare_and_write(conditions, operations)
        }
        fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
            self.inner.exists(key)
        }
        fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
            let rows = self.inner.prefix_scan(prefix)?;
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.inner.put(&allocation_root_key("a1"), &[9; 32])?;
            }
            Ok(rows)
        }
    }

    #[test]
    fn test_recompute_does_not_overwrite_concurrent_commit() {
        let (kv, trees) = store();
        let root = seed(&trees);
        kv.put(&allocation_root_key("a1"), &root).unwrap();

        // Stale hash on /docs so the recomputation stages a write.
        let mut docs = trees.resolve("a1", "/docs").unwrap();
        docs.hash = [0; 32];
        kv.put(
            &reference_key("a1", &docs.lookup_hash),
            &shared_types::encode(&docs).unwrap(),
        )
        .unwrap();

        let racing = Arc::new(CommitDuringLoad {
            inner: InMemoryKVStore::new(),
            fired: AtomicBool::new(false),
        });
        for (k, v) in kv.snapshot() {
            racing.inner.put(&k, &v).unwrap();
        }
        let trees = TreeStore::new(
            racing.clone(),
            Arc::new(Sha256Strategy),
            Arc::new(ManualTimeSource::new(50)),
        );

        let err = trees.recompute_hashes("a1", "/", true).unwrap_err();
        assert!(matches!(err, TreeError::Concurrent { .. }));
        assert_eq!(trees.resolve("a1", "/docs").unwrap().hash, [0; 32]);
    }
}
