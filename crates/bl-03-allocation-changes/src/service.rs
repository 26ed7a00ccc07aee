//! # Change Processor
//!
//! Applies [`AllocationChange`]s to a [`ReferenceTree`] working copy and
//! rolls the hashes up to the root after each one.

use std::collections::HashSet;
use std::sync::Arc;

use bl_02_reference_tree::{path, ReferenceNode, ReferenceTree, TreeError};
use shared_types::{short_hex, Hash, TimeSource, Timestamp};
use tracing::{debug, info};

use crate::cleanup::{CleanupQueue, CleanupTask};
use crate::domain::change::{AllocationChange, ChangeOperation, FileUpload};
use crate::error::ChangeError;
use crate::ports::BlobFile;

/// Result of applying one or more changes.
#[derive(Clone, Debug)]
pub struct Applied {
    /// Root directory after the changes, with its recomputed hash.
    pub root: ReferenceNode,
    /// Content hashes no file in the tree references any more.
    pub released: Vec<String>,
}

impl Applied {
    pub fn root_hash(&self) -> Hash {
        self.root.hash
    }
}

pub struct ChangeProcessor {
    time: Arc<dyn TimeSource>,
    cleanup: CleanupQueue,
}

impl ChangeProcessor {
    pub fn new(time: Arc<dyn TimeSource>, cleanup: CleanupQueue) -> Self {
        Self { time, cleanup }
    }

    /// Apply one change. `proposed_root` is the root the client signed; it
    /// is stamped on every file the change writes.
    pub fn apply(
        &self,
        tree: &mut ReferenceTree,
        change: &AllocationChange,
        proposed_root: Hash,
    ) -> Result<Applied, ChangeError> {
        let released = self.apply_one(tree, change, proposed_root)?;
        Ok(Applied {
            root: tree.root().clone(),
            released: unreferenced(tree, released)?,
        })
    }

    /// Apply the changes of a connection in order. Stops at the first
    /// failure; the working copy must then be discarded.
    pub fn apply_all(
        &self,
        tree: &mut ReferenceTree,
        changes: &[AllocationChange],
        proposed_root: Hash,
    ) -> Result<Applied, ChangeError> {
        let mut released = Vec::new();
        for change in changes {
            released.extend(self.apply_one(tree, change, proposed_root)?);
        }
        let applied = Applied {
            root: tree.root().clone(),
            released: unreferenced(tree, released)?,
        };
        info!(
            "[bl-03] Applied {} changes to {} -> {}",
            changes.len(),
            tree.allocation_id(),
            short_hex(&applied.root.hash)
        );
        Ok(applied)
    }

    /// Queue removal of content released by a durable commit.
    pub fn release(&self, allocation_id: &str, applied: &Applied) {
        self.cleanup
            .enqueue_all(applied.released.iter().map(|hash| CleanupTask::DeleteContent {
                allocation_id: allocation_id.to_string(),
                content_hash: hash.clone(),
            }));
    }

    /// Queue removal of the temp uploads of changes that will never commit.
    pub fn discard_uploads(&self, changes: &[AllocationChange]) {
        self.cleanup.enqueue_all(changes.iter().filter_map(|c| {
            c.operation.upload().map(|u| CleanupTask::DeleteTemp {
                allocation_id: c.allocation_id.clone(),
                connection_id: c.connection_id.clone(),
                file: BlobFile::from(u),
            })
        }));
    }

    fn apply_one(
        &self,
        tree: &mut ReferenceTree,
        change: &AllocationChange,
        proposed_root: Hash,
    ) -> Result<Vec<String>, ChangeError> {
        if change.allocation_id != tree.allocation_id() {
            return Err(ChangeError::InvalidOperation(format!(
                "change for {} applied to {}",
                change.allocation_id,
                tree.allocation_id()
            )));
        }
        let now = self.time.now();
        debug!(
            "[bl-03] {} {} on {}",
            change.operation.kind(),
            change.operation.target_path(),
            change.allocation_id
        );

        match &change.operation {
            ChangeOperation::NewFile(upload) => new_file(tree, upload, proposed_root, now),
            ChangeOperation::UpdateFile(upload) => update_file(tree, upload, proposed_root, now),
            ChangeOperation::DeleteFile { path } => delete(tree, path),
            ChangeOperation::Rename { path, new_name } => rename(tree, path, new_name, now),
            ChangeOperation::Copy { path, dest_dir } => copy(tree, path, dest_dir, now),
            ChangeOperation::Move { path, dest_dir } => relocate(tree, path, dest_dir, now),
        }
    }
}

// =============================================================================
// PER-KIND APPLICATION
// =============================================================================

fn new_file(
    tree: &mut ReferenceTree,
    upload: &FileUpload,
    proposed_root: Hash,
    now: Timestamp,
) -> Result<Vec<String>, ChangeError> {
    let path = path::normalize(&upload.path)?;
    let parent = path::parent(&path)
        .ok_or_else(|| ChangeError::InvalidOperation("the root is a directory".into()))?
        .to_string();

    match tree.resolve(&path) {
        Ok(_) => return Err(ChangeError::InvalidOperation(format!("{} already exists", path))),
        Err(TreeError::NotFound { .. }) => {}
        Err(TreeError::InvalidReferencePath { .. }) => ensure_creatable(tree, &parent, &path)?,
        Err(e) => return Err(e.into()),
    }

    tree.create_dir_all(&parent, now)?;
    let id = tree.insert_file(&path, upload.size, upload.to_meta(proposed_root), now)?;
    tree.recompute_hashes(&id, false)?;
    Ok(Vec::new())
}

fn update_file(
    tree: &mut ReferenceTree,
    upload: &FileUpload,
    proposed_root: Hash,
    now: Timestamp,
) -> Result<Vec<String>, ChangeError> {
    let node = tree.resolve(&upload.path)?;
    let previous = node
        .file()
        .ok_or_else(|| ChangeError::InvalidOperation(format!("{} is a directory", node.path)))?
        .content_hash
        .clone();
    let id = node.lookup_hash;

    tree.update_file(&id, upload.size, upload.to_meta(proposed_root), now)?;
    tree.recompute_hashes(&id, false)?;

    if previous != upload.content_hash {
        Ok(vec![previous])
    } else {
        Ok(Vec::new())
    }
}

fn delete(tree: &mut ReferenceTree, path: &str) -> Result<Vec<String>, ChangeError> {
    let node = tree.resolve(path)?;
    let Some(parent) = node.parent else {
        return Err(ChangeError::InvalidOperation("cannot delete the root".into()));
    };
    let id = node.lookup_hash;

    let removed = tree.remove(&id)?;
    tree.recompute_hashes(&parent, false)?;
    Ok(removed
        .iter()
        .filter_map(|n| n.file().map(|m| m.content_hash.clone()))
        .collect())
}

fn rename(
    tree: &mut ReferenceTree,
    path: &str,
    new_name: &str,
    now: Timestamp,
) -> Result<Vec<String>, ChangeError> {
    let node = tree.resolve(path)?;
    let Some(parent) = node.parent else {
        return Err(ChangeError::InvalidOperation("cannot rename the root".into()));
    };
    let id = node.lookup_hash;

    let new_id = tree.relocate(&id, &parent, new_name, now)?;
    tree.recompute_hashes(&new_id, true)?;
    Ok(Vec::new())
}

fn copy(
    tree: &mut ReferenceTree,
    path: &str,
    dest_dir: &str,
    now: Timestamp,
) -> Result<Vec<String>, ChangeError> {
    let source = tree.resolve(path)?.clone();
    let dest = prepare_destination(tree, &source, dest_dir)?;

    let dest_id = tree.create_dir_all(&dest, now)?;
    let new_id = tree.copy(&source.lookup_hash, &dest_id, now)?;
    tree.recompute_hashes(&new_id, true)?;
    Ok(Vec::new())
}

fn relocate(
    tree: &mut ReferenceTree,
    path: &str,
    dest_dir: &str,
    now: Timestamp,
) -> Result<Vec<String>, ChangeError> {
    let source = tree.resolve(path)?.clone();
    let Some(old_parent) = source.parent else {
        return Err(ChangeError::InvalidOperation("cannot move the root".into()));
    };
    let dest = prepare_destination(tree, &source, dest_dir)?;

    let dest_id = tree.create_dir_all(&dest, now)?;
    let new_id = tree.relocate(&source.lookup_hash, &dest_id, &source.name, now)?;
    tree.recompute_hashes(&new_id, true)?;
    tree.recompute_hashes(&old_parent, false)?;
    Ok(Vec::new())
}

// =============================================================================
// VALIDATION HELPERS
// =============================================================================

/// Every existing ancestor of `dir` must be a directory, so the missing rest
/// can be created.
fn ensure_creatable(tree: &ReferenceTree, dir: &str, target: &str) -> Result<(), ChangeError> {
    for prefix in path::ancestry(dir) {
        match tree.resolve(&prefix) {
            Ok(node) if node.is_dir() => continue,
            Ok(_) => {
                return Err(ChangeError::InvalidReferencePath {
                    path: target.to_string(),
                })
            }
            Err(TreeError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Check a copy/move destination before anything is created. Returns the
/// normalized destination directory.
fn prepare_destination(
    tree: &ReferenceTree,
    source: &ReferenceNode,
    dest_dir: &str,
) -> Result<String, ChangeError> {
    let dest = path::normalize(dest_dir)?;
    let target = path::join(&dest, &source.name);
    ensure_creatable(tree, &dest, &target)?;

    if tree.resolve(&target).is_ok() {
        return Err(ChangeError::InvalidOperation(format!("{} already exists", target)));
    }
    if source.is_dir() && path::is_within(&dest, &source.path) {
        return Err(ChangeError::InvalidOperation(format!(
            "cannot place {} inside itself",
            source.path
        )));
    }
    Ok(dest)
}

/// Drop released hashes some remaining file still points at.
fn unreferenced(tree: &ReferenceTree, mut released: Vec<String>) -> Result<Vec<String>, ChangeError> {
    if released.is_empty() {
        return Ok(released);
    }
    let root = tree.root().lookup_hash;
    let in_use: HashSet<&str> = tree
        .subtree(&root)?
        .into_iter()
        .filter_map(|n| n.file().map(|m| m.content_hash.as_str()))
        .collect();

    released.sort();
    released.dedup();
    released.retain(|hash| !in_use.contains(hash.as_str()));
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBlobStore;
    use crate::cleanup::cleanup_channel;
    use shared_types::{ManualTimeSource, Sha256Strategy};

    const ROOT: Hash = [0xaa; 32];

    fn processor() -> ChangeProcessor {
        let (queue, _worker) = cleanup_channel(Arc::new(InMemoryBlobStore::new()));
        ChangeProcessor::new(Arc::new(ManualTimeSource::new(500)), queue)
    }

    fn tree() -> ReferenceTree {
        ReferenceTree::new("a1", Arc::new(Sha256Strategy), 0)
    }

    fn upload(path: &str, size: u64, content: &str) -> FileUpload {
        FileUpload {
            path: path.into(),
            size,
            content_hash: content.into(),
            merkle_root: format!("m-{content}"),
            ..Default::default()
        }
    }

    fn change(op: ChangeOperation) -> AllocationChange {
        AllocationChange::new("a1", "conn", 0, op)
    }

    fn seeded() -> (ChangeProcessor, ReferenceTree) {
        let p = processor();
        let mut t = tree();
        p.apply(&mut t, &change(ChangeOperation::NewFile(upload("/docs/a.txt", 10, "c1"))), ROOT)
            .unwrap();
        (p, t)
    }

    #[test]
    fn test_new_file_creates_parents_and_stamps_marker() {
        let (_, t) = seeded();
        let file = t.resolve("/docs/a.txt").unwrap();
        assert_eq!(file.file().unwrap().write_marker, Some(ROOT));
        assert_eq!(t.resolve("/docs").unwrap().size, 10);
        assert_eq!(t.root().size, 10);
    }

    #[test]
    fn test_new_file_over_existing_is_invalid() {
        let (p, mut t) = seeded();
        let before = t.root_hash();
        let err = p
            .apply(&mut t, &change(ChangeOperation::NewFile(upload("/docs/a.txt", 1, "c2"))), ROOT)
            .unwrap_err();
        assert!(matches!(err, ChangeError::InvalidOperation(_)));
        assert_eq!(t.root_hash(), before);
    }

    #[test]
    fn test_new_file_below_a_file_is_invalid_reference_path() {
        let (p, mut t) = seeded();
        let err = p
            .apply(
                &mut t,
                &change(ChangeOperation::NewFile(upload("/docs/a.txt/x/y", 1, "c2"))),
                ROOT,
            )
            .unwrap_err();
        assert!(matches!(err, ChangeError::InvalidReferencePath { .. }));
    }

    #[test]
    fn test_update_with_missing_directory_leaves_tree_unchanged() {
        let p = processor();
        let mut t = tree();
        t.mark_persisted();
        let before = t.root_hash();

        let err = p
            .apply(&mut t, &change(ChangeOperation::UpdateFile(upload("/docs/a.txt", 1, "c"))), ROOT)
            .unwrap_err();

        assert_eq!(
            err,
            ChangeError::InvalidReferencePath {
                path: "/docs/a.txt".into()
            }
        );
        assert_eq!(t.root_hash(), before);
        assert!(!t.is_dirty());
    }

    #[test]
    fn test_update_missing_file_is_file_not_found() {
        let (p, mut t) = seeded();
        let err = p
            .apply(&mut t, &change(ChangeOperation::UpdateFile(upload("/docs/b.txt", 1, "c"))), ROOT)
            .unwrap_err();
        assert!(matches!(err, ChangeError::FileNotFound { .. }));
    }

    #[test]
    fn test_update_releases_superseded_content() {
        let (p, mut t) = seeded();
        let before = t.root_hash();
        let applied = p
            .apply(&mut t, &change(ChangeOperation::UpdateFile(upload("/docs/a.txt", 20, "c2"))), [0xbb; 32])
            .unwrap();

        assert_ne!(applied.root_hash(), before);
        assert_eq!(applied.root.size, 20);
        assert_eq!(applied.released, vec!["c1".to_string()]);
        let meta = t.resolve("/docs/a.txt").unwrap().file().unwrap().clone();
        assert_eq!(meta.content_hash, "c2");
        assert_eq!(meta.write_marker, Some([0xbb; 32]));
    }

    #[test]
    fn test_delete_directory_releases_all_files() {
        let (p, mut t) = seeded();
        p.apply(&mut t, &change(ChangeOperation::NewFile(upload("/docs/sub/b", 5, "c2"))), ROOT)
            .unwrap();

        let applied = p
            .apply(&mut t, &change(ChangeOperation::DeleteFile { path: "/docs".into() }), ROOT)
            .unwrap();
        assert_eq!(applied.released, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(applied.root.size, 0);
        assert_eq!(applied.root_hash(), tree().root_hash());
    }

    #[test]
    fn test_content_shared_by_a_copy_is_not_released() {
        let (p, mut t) = seeded();
        p.apply(
            &mut t,
            &change(ChangeOperation::Copy {
                path: "/docs/a.txt".into(),
                dest_dir: "/backup".into(),
            }),
            ROOT,
        )
        .unwrap();

        let applied = p
            .apply(&mut t, &change(ChangeOperation::DeleteFile { path: "/docs/a.txt".into() }), ROOT)
            .unwrap();
        assert!(applied.released.is_empty());
        assert_eq!(t.resolve("/backup/a.txt").unwrap().size, 10);
    }

    #[test]
    fn test_rename_rederives_descendants() {
        let (p, mut t) = seeded();
        p.apply(
            &mut t,
            &change(ChangeOperation::Rename {
                path: "/docs".into(),
                new_name: "papers".into(),
            }),
            ROOT,
        )
        .unwrap();

        let moved = t.resolve("/papers/a.txt").unwrap();
        assert_eq!(moved.lookup_hash, t.lookup_hash("/papers/a.txt"));
        assert!(matches!(t.resolve("/docs"), Err(TreeError::NotFound { .. })));
    }

    #[test]
    fn test_rename_onto_sibling_is_invalid() {
        let (p, mut t) = seeded();
        p.apply(&mut t, &change(ChangeOperation::NewFile(upload("/docs/b.txt", 1, "c2"))), ROOT)
            .unwrap();
        let err = p
            .apply(
                &mut t,
                &change(ChangeOperation::Rename {
                    path: "/docs/a.txt".into(),
                    new_name: "b.txt".into(),
                }),
                ROOT,
            )
            .unwrap_err();
        assert!(matches!(err, ChangeError::InvalidOperation(_)));
    }

    #[test]
    fn test_move_matches_fresh_build() {
        let (p, mut t) = seeded();
        let applied = p
            .apply(
                &mut t,
                &change(ChangeOperation::Move {
                    path: "/docs/a.txt".into(),
                    dest_dir: "/archive/2024".into(),
                }),
                ROOT,
            )
            .unwrap();

        let mut fresh = tree();
        p.apply(&mut fresh, &change(ChangeOperation::NewFile(upload("/archive/2024/a.txt", 10, "c1"))), ROOT)
            .unwrap();
        fresh.create_dir_all("/docs", 0).unwrap();
        let fresh_root = fresh.recompute_all().unwrap();

        assert_eq!(applied.root_hash(), fresh_root);
        assert_eq!(t.resolve("/docs").unwrap().size, 0);
    }

    #[test]
    fn test_move_into_own_subtree_is_rejected_before_mutation() {
        let (p, mut t) = seeded();
        let before = t.root_hash();
        let nodes = t.len();
        let err = p
            .apply(
                &mut t,
                &change(ChangeOperation::Move {
                    path: "/docs".into(),
                    dest_dir: "/docs/inner".into(),
                }),
                ROOT,
            )
            .unwrap_err();

        assert!(matches!(err, ChangeError::InvalidOperation(_)));
        assert_eq!(t.len(), nodes);
        assert_eq!(t.root_hash(), before);
    }

    #[test]
    fn test_change_for_other_allocation_is_rejected() {
        let p = processor();
        let mut t = tree();
        let foreign = AllocationChange::new(
            "a2",
            "conn",
            0,
            ChangeOperation::DeleteFile { path: "/x".into() },
        );
        assert!(matches!(
            p.apply(&mut t, &foreign, ROOT),
            Err(ChangeError::InvalidOperation(_))
        ));
    }
}
