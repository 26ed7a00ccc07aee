//! # Blobber - Reference Tree (Subsystem 02)
//!
//! **Bounded Context:** Allocation File Tree & Integrity Hashes
//!
//! ## Purpose
//!
//! Each allocation owns a hierarchical namespace of directories and files.
//! Every node is addressed by its *lookup hash* `H(allocation_id, path)` and
//! carries an *integrity hash*:
//!
//! - file hash = H(own metadata, content hash, size)
//! - directory hash = H(own metadata, ordered child hashes)
//! - directory size = sum of child sizes
//!
//! The root directory's hash is the allocation root that write markers commit
//! to.
//!
//! ## Working Copy Model
//!
//! ```text
//!   TreeStore::load ──► ReferenceTree (arena, in memory)
//!                           │  mutate + recompute_hashes
//!                           ▼
//!                   staged_operations()  ──►  one atomic batch
//! ```
//!
//! A tree is loaded into an arena keyed by lookup hash. Mutations and hash
//! recomputation only touch the arena; the persisted rows change when the
//! staged batch is written, so an aborted update leaves the previous hashes
//! intact.
//!
//! ## Invariants
//!
//! 1. Exactly one node per lookup hash per allocation
//! 2. A directory's children are exactly the nodes one path level below it
//! 3. After `recompute_hashes`, every ancestor of the touched node has a hash
//!    that is a pure function of its children and its own metadata

#![warn(clippy::all)]

pub mod domain;
pub mod error;
pub mod service;

pub use domain::node::{FileAttributes, FileMeta, NodeKind, ReferenceNode, Thumbnail, WhoPays};
pub use domain::path;
pub use domain::tree::ReferenceTree;
pub use error::TreeError;
pub use service::TreeStore;
