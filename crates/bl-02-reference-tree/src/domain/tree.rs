//! # Arena Tree
//!
//! Nodes live in a map keyed by lookup hash; parent and children are stored as
//! lookup hashes, never as pointers. Every mutation records which rows must be
//! written or deleted, and [`ReferenceTree::staged_operations`] turns that into
//! a single batch.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use shared_types::keys::reference_key;
use shared_types::{encode, hash_hex, BatchOperation, Hash, HashStrategy, Timestamp};

use crate::domain::node::{FileMeta, NodeKind, ReferenceNode};
use crate::domain::path::{self, ROOT_PATH};
use crate::error::TreeError;

/// Working copy of one allocation's tree.
pub struct ReferenceTree {
    allocation_id: String,
    strategy: Arc<dyn HashStrategy>,
    nodes: HashMap<Hash, ReferenceNode>,
    root: Hash,
    dirty: BTreeSet<Hash>,
    removed: BTreeSet<Hash>,
}

impl std::fmt::Debug for ReferenceTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceTree")
            .field("allocation_id", &self.allocation_id)
            .field("nodes", &self.nodes.len())
            .field("root_hash", &hash_hex(&self.root_hash()))
            .finish()
    }
}

fn unknown(id: &Hash) -> TreeError {
    TreeError::UnknownNode {
        lookup: hash_hex(id),
    }
}

fn rebase(path: &str, old_base: &str, new_base: &str) -> String {
    format!("{}{}", new_base, &path[old_base.len()..])
}

impl ReferenceTree {
    /// Empty tree: a root directory with no children.
    pub fn new(allocation_id: &str, strategy: Arc<dyn HashStrategy>, now: Timestamp) -> Self {
        let root = strategy.lookup_hash(allocation_id, ROOT_PATH);
        let mut node = ReferenceNode::new_directory(allocation_id, root, None, ROOT_PATH, now);
        node.hash = node.compute_hash(strategy.as_ref(), &[]);

        let mut tree = Self {
            allocation_id: allocation_id.to_string(),
            strategy,
            nodes: HashMap::new(),
            root,
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
        };
        tree.insert_node(node);
        tree
    }

    /// Rebuild a tree from persisted nodes. No nodes means an empty tree.
    pub fn from_nodes(
        allocation_id: &str,
        strategy: Arc<dyn HashStrategy>,
        nodes: Vec<ReferenceNode>,
        now: Timestamp,
    ) -> Result<Self, TreeError> {
        if nodes.is_empty() {
            return Ok(Self::new(allocation_id, strategy, now));
        }

        let root = strategy.lookup_hash(allocation_id, ROOT_PATH);
        let nodes: HashMap<Hash, ReferenceNode> =
            nodes.into_iter().map(|n| (n.lookup_hash, n)).collect();
        if !nodes.contains_key(&root) {
            return Err(TreeError::Corrupt(format!(
                "allocation {} has nodes but no root",
                allocation_id
            )));
        }
        for node in nodes.values() {
            for child in node.children().into_iter().flat_map(|c| c.values()) {
                if !nodes.contains_key(child) {
                    return Err(TreeError::Corrupt(format!(
                        "{} references missing child {}",
                        node.path,
                        hash_hex(child)
                    )));
                }
            }
        }

        Ok(Self {
            allocation_id: allocation_id.to_string(),
            strategy,
            nodes,
            root,
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
        })
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn allocation_id(&self) -> &str {
        &self.allocation_id
    }

    pub fn root(&self) -> &ReferenceNode {
        // The root is inserted at construction and can never be removed.
        &self.nodes[&self.root]
    }

    pub fn root_hash(&self) -> Hash {
        self.root().hash
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root().children().map_or(true, |c| c.is_empty())
    }

    /// Whether there are staged changes.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty()
    }

    pub fn lookup_hash(&self, path: &str) -> Hash {
        self.strategy.lookup_hash(&self.allocation_id, path)
    }

    pub fn get(&self, id: &Hash) -> Option<&ReferenceNode> {
        self.nodes.get(id)
    }

    fn node(&self, id: &Hash) -> Result<&ReferenceNode, TreeError> {
        self.nodes.get(id).ok_or_else(|| unknown(id))
    }

    /// Walk from the root one segment per level.
    ///
    /// A missing final segment is `NotFound`; a missing or non-directory
    /// intermediate segment is `InvalidReferencePath`.
    pub fn resolve(&self, path: &str) -> Result<&ReferenceNode, TreeError> {
        let path = path::normalize(path)?;
        let segments: Vec<&str> = path::segments(&path).collect();

        let mut current = self.root();
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            match current.children().and_then(|c| c.get(*segment)) {
                Some(id) => current = self.node(id)?,
                None if last && current.is_dir() => {
                    return Err(TreeError::NotFound { path: path.clone() });
                }
                None => {
                    return Err(TreeError::InvalidReferencePath { path: path.clone() });
                }
            }
        }
        Ok(current)
    }

    pub fn resolve_by_lookup_hash(&self, id: &Hash) -> Result<&ReferenceNode, TreeError> {
        self.nodes.get(id).ok_or_else(|| TreeError::NotFound {
            path: hash_hex(id),
        })
    }

    /// Children of a directory in name order. Files have none.
    pub fn list_children(&self, node: &ReferenceNode) -> Vec<&ReferenceNode> {
        node.children()
            .into_iter()
            .flat_map(|c| c.values())
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// The node and all its descendants, pre-order, children in name order.
    pub fn subtree(&self, id: &Hash) -> Result<Vec<&ReferenceNode>, TreeError> {
        self.subtree_ids(id)?
            .iter()
            .map(|i| self.node(i))
            .collect()
    }

    fn subtree_ids(&self, id: &Hash) -> Result<Vec<Hash>, TreeError> {
        let mut out = Vec::new();
        let mut stack = vec![*id];
        while let Some(current) = stack.pop() {
            let node = self.node(&current)?;
            out.push(current);
            if let Some(children) = node.children() {
                stack.extend(children.values().rev().copied());
            }
        }
        Ok(out)
    }

    // =========================================================================
    // MUTATIONS (hashes are not recomputed here; see `recompute_hashes`)
    // =========================================================================

    fn insert_node(&mut self, node: ReferenceNode) {
        let id = node.lookup_hash;
        self.removed.remove(&id);
        self.dirty.insert(id);
        self.nodes.insert(id, node);
    }

    fn take_node(&mut self, id: &Hash) -> Result<ReferenceNode, TreeError> {
        let node = self.nodes.remove(id).ok_or_else(|| unknown(id))?;
        self.dirty.remove(id);
        self.removed.insert(*id);
        Ok(node)
    }

    fn attach(&mut self, parent: Hash, name: &str, child: Hash) -> Result<(), TreeError> {
        let dir = self.nodes.get_mut(&parent).ok_or_else(|| unknown(&parent))?;
        let path = dir.path.clone();
        dir.children_mut()
            .ok_or(TreeError::NotADirectory { path })?
            .insert(name.to_string(), child);
        self.dirty.insert(parent);
        Ok(())
    }

    fn detach(&mut self, parent: Hash, name: &str) -> Result<(), TreeError> {
        let dir = self.nodes.get_mut(&parent).ok_or_else(|| unknown(&parent))?;
        if let Some(children) = dir.children_mut() {
            children.remove(name);
        }
        self.dirty.insert(parent);
        Ok(())
    }

    /// Create every missing directory along `path`. Returns the last one.
    pub fn create_dir_all(&mut self, path: &str, now: Timestamp) -> Result<Hash, TreeError> {
        let path = path::normalize(path)?;
        let mut current = self.root;
        let mut current_path = ROOT_PATH.to_string();

        for segment in path::segments(&path) {
            let child_path = path::join(&current_path, segment);
            let existing = self
                .node(&current)?
                .children()
                .and_then(|c| c.get(segment))
                .copied();

            current = match existing {
                Some(id) => {
                    if !self.node(&id)?.is_dir() {
                        return Err(TreeError::NotADirectory { path: child_path });
                    }
                    id
                }
                None => {
                    let id = self.lookup_hash(&child_path);
                    let mut dir = ReferenceNode::new_directory(
                        &self.allocation_id,
                        id,
                        Some(current),
                        &child_path,
                        now,
                    );
                    dir.hash = dir.compute_hash(self.strategy.as_ref(), &[]);
                    self.attach(current, segment, id)?;
                    self.insert_node(dir);
                    id
                }
            };
            current_path = child_path;
        }
        Ok(current)
    }

    /// Add a file under an existing directory.
    pub fn insert_file(
        &mut self,
        path: &str,
        size: u64,
        meta: FileMeta,
        now: Timestamp,
    ) -> Result<Hash, TreeError> {
        let path = path::normalize(path)?;
        let parent_path = path::parent(&path)
            .ok_or_else(|| TreeError::InvalidOperation("the root is a directory".into()))?;

        let parent = match self.resolve(parent_path) {
            Ok(p) if p.is_dir() => p,
            Ok(_) | Err(TreeError::NotFound { .. }) | Err(TreeError::InvalidReferencePath { .. }) => {
                return Err(TreeError::InvalidReferencePath { path: path.clone() });
            }
            Err(e) => return Err(e),
        };
        let name = path::file_name(&path);
        if parent.children().is_some_and(|c| c.contains_key(name)) {
            return Err(TreeError::AlreadyExists { path: path.clone() });
        }
        let parent_id = parent.lookup_hash;

        let id = self.lookup_hash(&path);
        let mut node =
            ReferenceNode::new_file(&self.allocation_id, id, parent_id, &path, size, meta, now);
        node.hash = node.compute_hash(self.strategy.as_ref(), &[]);
        self.attach(parent_id, name, id)?;
        self.insert_node(node);
        Ok(id)
    }

    /// Replace a file's content and metadata in place.
    pub fn update_file(
        &mut self,
        id: &Hash,
        size: u64,
        meta: FileMeta,
        now: Timestamp,
    ) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(id).ok_or_else(|| unknown(id))?;
        if !node.is_file() {
            return Err(TreeError::NotAFile {
                path: node.path.clone(),
            });
        }
        node.size = size;
        node.kind = NodeKind::File(meta);
        node.updated_at = now;
        self.dirty.insert(*id);
        Ok(())
    }

    /// Remove a node and its whole subtree. Returns the removed nodes.
    pub fn remove(&mut self, id: &Hash) -> Result<Vec<ReferenceNode>, TreeError> {
        if *id == self.root {
            return Err(TreeError::InvalidOperation("cannot delete the root".into()));
        }
        let node = self.node(id)?;
        let parent = node
            .parent
            .ok_or_else(|| TreeError::Corrupt(format!("{} has no parent", node.path)))?;
        let name = node.name.clone();

        let ids = self.subtree_ids(id)?;
        self.detach(parent, &name)?;
        ids.iter().map(|i| self.take_node(i)).collect()
    }

    fn check_destination(
        &self,
        source: &ReferenceNode,
        dest_dir: &Hash,
        new_name: &str,
    ) -> Result<String, TreeError> {
        path::validate_name(new_name)?;
        if source.lookup_hash == self.root {
            return Err(TreeError::InvalidOperation("cannot relocate the root".into()));
        }
        let dest = self.node(dest_dir)?;
        let children = dest.children().ok_or_else(|| TreeError::NotADirectory {
            path: dest.path.clone(),
        })?;
        let new_path = path::join(&dest.path, new_name);
        if children.contains_key(new_name) {
            return Err(TreeError::AlreadyExists { path: new_path });
        }
        if source.is_dir() && path::is_within(&dest.path, &source.path) {
            return Err(TreeError::InvalidOperation(format!(
                "cannot place {} inside itself",
                source.path
            )));
        }
        Ok(new_path)
    }

    /// Move `id` (with its subtree) into `dest_dir` under `new_name`.
    ///
    /// Lookup hashes are path-derived, so every node of the subtree gets a new
    /// identity. Renaming is relocation into the same parent.
    pub fn relocate(
        &mut self,
        id: &Hash,
        dest_dir: &Hash,
        new_name: &str,
        now: Timestamp,
    ) -> Result<Hash, TreeError> {
        let source = self.node(id)?;
        let new_path = self.check_destination(source, dest_dir, new_name)?;
        let old_path = source.path.clone();
        let old_name = source.name.clone();
        let old_parent = source
            .parent
            .ok_or_else(|| TreeError::Corrupt(format!("{} has no parent", old_path)))?;

        let ids = self.subtree_ids(id)?;
        self.detach(old_parent, &old_name)?;
        let moved: Vec<ReferenceNode> = ids
            .iter()
            .map(|i| self.take_node(i))
            .collect::<Result<_, _>>()?;

        let mapping: HashMap<Hash, Hash> = moved
            .iter()
            .map(|n| {
                let p = rebase(&n.path, &old_path, &new_path);
                (n.lookup_hash, self.lookup_hash(&p))
            })
            .collect();
        let remap = |h: &Hash| mapping.get(h).copied().ok_or_else(|| unknown(h));

        for mut node in moved {
            let old_id = node.lookup_hash;
            node.path = rebase(&node.path, &old_path, &new_path);
            node.name = path::file_name(&node.path).to_string();
            node.lookup_hash = remap(&old_id)?;
            node.parent = if old_id == *id {
                Some(*dest_dir)
            } else {
                node.parent.as_ref().map(remap).transpose()?
            };
            if let Some(children) = node.children_mut() {
                for child in children.values_mut() {
                    *child = remap(&*child)?;
                }
            }
            node.updated_at = now;
            self.insert_node(node);
        }

        let new_id = remap(id)?;
        self.attach(*dest_dir, new_name, new_id)?;
        Ok(new_id)
    }

    /// Duplicate `id` (with its subtree) into `dest_dir` under the same name.
    pub fn copy(&mut self, id: &Hash, dest_dir: &Hash, now: Timestamp) -> Result<Hash, TreeError> {
        let source = self.node(id)?;
        let name = source.name.clone();
        let new_path = self.check_destination(source, dest_dir, &name)?;
        let old_path = source.path.clone();

        let copies: Vec<ReferenceNode> = self
            .subtree(id)?
            .into_iter()
            .cloned()
            .collect();
        let mapping: HashMap<Hash, Hash> = copies
            .iter()
            .map(|n| {
                let p = rebase(&n.path, &old_path, &new_path);
                (n.lookup_hash, self.lookup_hash(&p))
            })
            .collect();
        let remap = |h: &Hash| mapping.get(h).copied().ok_or_else(|| unknown(h));

        for mut node in copies {
            let old_id = node.lookup_hash;
            node.path = rebase(&node.path, &old_path, &new_path);
            node.lookup_hash = remap(&old_id)?;
            node.parent = if old_id == *id {
                Some(*dest_dir)
            } else {
                node.parent.as_ref().map(remap).transpose()?
            };
            if let Some(children) = node.children_mut() {
                for child in children.values_mut() {
                    *child = remap(&*child)?;
                }
            }
            node.created_at = now;
            node.updated_at = now;
            self.insert_node(node);
        }

        let new_id = remap(id)?;
        self.attach(*dest_dir, &name, new_id)?;
        Ok(new_id)
    }

    // =========================================================================
    // HASH ROLLUP
    // =========================================================================

    /// Recompute hashes from `id` up to the root and return the new root hash.
    ///
    /// With `recursive`, the whole subtree under `id` is recomputed bottom-up
    /// first; otherwise `id` is recomputed from its children's current hashes.
    pub fn recompute_hashes(&mut self, id: &Hash, recursive: bool) -> Result<Hash, TreeError> {
        if recursive {
            let ids = self.subtree_ids(id)?;
            for i in ids.iter().rev() {
                self.recompute_node(i)?;
            }
        } else {
            self.recompute_node(id)?;
        }

        let mut parent = self.node(id)?.parent;
        while let Some(p) = parent {
            self.recompute_node(&p)?;
            parent = self.node(&p)?.parent;
        }
        Ok(self.root_hash())
    }

    /// Recompute the entire tree.
    pub fn recompute_all(&mut self) -> Result<Hash, TreeError> {
        let root = self.root;
        self.recompute_hashes(&root, true)
    }

    fn recompute_node(&mut self, id: &Hash) -> Result<(), TreeError> {
        let node = self.node(id)?;
        let (size, child_hashes) = match node.children() {
            Some(children) => {
                let mut size = 0u64;
                let mut hashes = Vec::with_capacity(children.len());
                for child in children.values() {
                    let child = self.node(child)?;
                    size = size.saturating_add(child.size);
                    hashes.push(child.hash);
                }
                (size, hashes)
            }
            None => (node.size, Vec::new()),
        };

        let strategy = Arc::clone(&self.strategy);
        let node = self.nodes.get_mut(id).ok_or_else(|| unknown(id))?;
        node.size = size;
        let hash = node.compute_hash(strategy.as_ref(), &child_hashes);
        if node.hash != hash {
            node.hash = hash;
            self.dirty.insert(*id);
        }
        Ok(())
    }

    // =========================================================================
    // STAGING
    // =========================================================================

    /// Batch that persists every change since load: deletes for removed
    /// nodes, puts for new or modified ones.
    pub fn staged_operations(&self) -> Result<Vec<BatchOperation>, TreeError> {
        let mut ops = Vec::with_capacity(self.removed.len() + self.dirty.len());
        for id in &self.removed {
            ops.push(BatchOperation::delete(reference_key(&self.allocation_id, id)));
        }
        for id in &self.dirty {
            let node = self.node(id)?;
            ops.push(BatchOperation::put(
                reference_key(&self.allocation_id, id),
                encode(node)?,
            ));
        }
        Ok(ops)
    }

    /// Forget staged changes after they have been written.
    pub fn mark_persisted(&mut self) {
        self.dirty.clear();
        self.removed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Sha256Strategy;

    const NOW: Timestamp = 1_000;

    fn tree() -> ReferenceTree {
        ReferenceTree::new("alloc-1", Arc::new(Sha256Strategy), NOW)
    }

    fn meta(content: &str) -> FileMeta {
        FileMeta {
            content_hash: content.into(),
            merkle_root: format!("m-{content}"),
            actual_file_size: 4,
            actual_file_hash: format!("a-{content}"),
            mime_type: "text/plain".into(),
            ..Default::default()
        }
    }

    fn add_file(t: &mut ReferenceTree, path: &str, size: u64, content: &str) -> Hash {
        let dir = path::parent(path).unwrap().to_string();
        t.create_dir_all(&dir, NOW).unwrap();
        let id = t.insert_file(path, size, meta(content), NOW).unwrap();
        t.recompute_hashes(&id, false).unwrap();
        id
    }

    #[test]
    fn test_resolve_distinguishes_missing_leaf_and_missing_parent() {
        let mut t = tree();
        add_file(&mut t, "/docs/a.txt", 10, "c1");

        assert_eq!(t.resolve("/docs/a.txt").unwrap().size, 10);
        assert_eq!(
            t.resolve("/docs/b.txt").unwrap_err(),
            TreeError::NotFound {
                path: "/docs/b.txt".into()
            }
        );
        assert_eq!(
            t.resolve("/photos/b.txt").unwrap_err(),
            TreeError::InvalidReferencePath {
                path: "/photos/b.txt".into()
            }
        );
        assert!(matches!(
            t.resolve("/docs/a.txt/x"),
            Err(TreeError::InvalidReferencePath { .. })
        ));
    }

    #[test]
    fn test_directory_size_is_sum_of_children() {
        let mut t = tree();
        add_file(&mut t, "/docs/a.txt", 10, "c1");
        add_file(&mut t, "/docs/b.txt", 5, "c2");
        add_file(&mut t, "/top.bin", 100, "c3");

        assert_eq!(t.resolve("/docs").unwrap().size, 15);
        assert_eq!(t.root().size, 115);
    }

    #[test]
    fn test_update_changes_every_ancestor_hash() {
        let mut t = tree();
        let id = add_file(&mut t, "/a/b/c.txt", 10, "c1");
        let before: Vec<Hash> = ["/", "/a", "/a/b"]
            .iter()
            .map(|p| t.resolve(p).unwrap().hash)
            .collect();

        t.update_file(&id, 10, meta("c2"), NOW + 1).unwrap();
        t.recompute_hashes(&id, false).unwrap();

        for (p, old) in ["/", "/a", "/a/b"].iter().zip(before) {
            assert_ne!(t.resolve(p).unwrap().hash, old, "{p} hash did not change");
        }
    }

    #[test]
    fn test_incremental_matches_full_recompute() {
        let mut t = tree();
        add_file(&mut t, "/a/x", 1, "1");
        add_file(&mut t, "/a/y", 2, "2");
        add_file(&mut t, "/b/z", 3, "3");
        let incremental = t.root_hash();

        assert_eq!(t.recompute_all().unwrap(), incremental);
    }

    #[test]
    fn test_insert_file_requires_parent() {
        let mut t = tree();
        assert!(matches!(
            t.insert_file("/missing/a.txt", 1, meta("c"), NOW),
            Err(TreeError::InvalidReferencePath { .. })
        ));
        add_file(&mut t, "/dup.txt", 1, "c");
        assert!(matches!(
            t.insert_file("/dup.txt", 1, meta("c"), NOW),
            Err(TreeError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_create_dir_all_refuses_to_descend_into_file() {
        let mut t = tree();
        add_file(&mut t, "/f", 1, "c");
        assert!(matches!(
            t.create_dir_all("/f/sub", NOW),
            Err(TreeError::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_remove_subtree_stages_deletes() {
        let mut t = tree();
        add_file(&mut t, "/d/a", 1, "1");
        add_file(&mut t, "/d/e/b", 2, "2");
        t.mark_persisted();

        let dir = t.resolve("/d").unwrap().lookup_hash;
        let removed = t.remove(&dir).unwrap();
        assert_eq!(removed.len(), 4);
        t.recompute_hashes(&t.root().lookup_hash.clone(), false).unwrap();

        let deletes = t
            .staged_operations()
            .unwrap()
            .into_iter()
            .filter(|op| matches!(op, BatchOperation::Delete { .. }))
            .count();
        assert_eq!(deletes, 4);
        assert_eq!(t.root().size, 0);
        assert_eq!(t.root_hash(), tree().root_hash());
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let mut t = tree();
        let root = t.root().lookup_hash;
        assert!(matches!(t.remove(&root), Err(TreeError::InvalidOperation(_))));
    }

    #[test]
    fn test_relocate_rederives_lookup_hashes() {
        let mut t = tree();
        add_file(&mut t, "/src/lib/a.rs", 1, "1");
        let dst = t.create_dir_all("/dst", NOW).unwrap();
        let src = t.resolve("/src/lib").unwrap().lookup_hash;

        let new_id = t.relocate(&src, &dst, "lib2", NOW + 5).unwrap();
        t.recompute_hashes(&new_id, true).unwrap();
        let old_parent = t.resolve("/src").unwrap().lookup_hash;
        t.recompute_hashes(&old_parent, false).unwrap();

        let moved = t.resolve("/dst/lib2/a.rs").unwrap();
        assert_eq!(moved.lookup_hash, t.lookup_hash("/dst/lib2/a.rs"));
        assert_eq!(moved.parent, Some(new_id));
        assert!(t.get(&src).is_none());
        assert!(matches!(t.resolve("/src/lib"), Err(TreeError::NotFound { .. })));
        assert_eq!(t.resolve("/dst").unwrap().size, 1);
    }

    #[test]
    fn test_relocate_into_own_subtree_rejected() {
        let mut t = tree();
        add_file(&mut t, "/a/b/c", 1, "1");
        let a = t.resolve("/a").unwrap().lookup_hash;
        let b = t.resolve("/a/b").unwrap().lookup_hash;
        assert!(matches!(
            t.relocate(&a, &b, "a", NOW),
            Err(TreeError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_copy_leaves_source_intact() {
        let mut t = tree();
        add_file(&mut t, "/a/f", 7, "1");
        let dst = t.create_dir_all("/b", NOW).unwrap();
        let a = t.resolve("/a").unwrap().lookup_hash;

        let copy = t.copy(&a, &dst, NOW).unwrap();
        let root = t.recompute_hashes(&copy, true).unwrap();

        assert_eq!(t.resolve("/a/f").unwrap().size, 7);
        assert_eq!(t.resolve("/b/a/f").unwrap().size, 7);
        assert_eq!(t.root().size, 14);
        assert_eq!(root, t.root_hash());
    }

    #[test]
    fn test_from_nodes_round_trip() {
        let mut t = tree();
        add_file(&mut t, "/a/f", 7, "1");
        let nodes: Vec<ReferenceNode> = t.subtree(&t.root().lookup_hash.clone()).unwrap().into_iter().cloned().collect();

        let rebuilt =
            ReferenceTree::from_nodes("alloc-1", Arc::new(Sha256Strategy), nodes, NOW).unwrap();
        assert_eq!(rebuilt.root_hash(), t.root_hash());
        assert!(!rebuilt.is_dirty());
    }

    #[test]
    fn test_from_nodes_without_root_is_corrupt() {
        let mut t = tree();
        add_file(&mut t, "/a/f", 7, "1");
        let file = t.resolve("/a/f").unwrap().clone();
        assert!(matches!(
            ReferenceTree::from_nodes("alloc-1", Arc::new(Sha256Strategy), vec![file], NOW),
            Err(TreeError::Corrupt(_))
        ));
    }
}
