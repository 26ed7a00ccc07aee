//! # Shared Types Crate
//!
//! Domain entities and infrastructure ports shared by every blobber subsystem.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: identifiers, the [`Allocation`] record and the
//!   persisted key layout are defined once, here.
//! - **Injected Persistence**: subsystems receive an `Arc<dyn KeyValueStore>`;
//!   nothing reaches for a global database handle.
//! - **Guarded Writes**: cross-task coordination happens only through
//!   [`KeyValueStore::compare_and_write`], never through long-held locks.
//! - **Pluggable Hashing**: integrity hashes are produced by a
//!   [`HashStrategy`], so the field encoding can follow the network's contract.
//!
//! ## Module Structure
//!
//! - [`entities`]: identifiers, hashes, the allocation record
//! - [`storage`]: `KeyValueStore` port, batch/condition types, in-memory and
//!   file-backed adapters
//! - [`keys`]: persisted key layout
//! - [`allocation`]: allocation repository over the split key layout
//! - [`hashing`]: SHA-256 and Keccak-256 hash strategies
//! - [`identity`]: ed25519 node identity and signature checks
//! - [`time`]: injectable clock

pub mod allocation;
pub mod entities;
pub mod errors;
pub mod hashing;
pub mod identity;
pub mod keys;
pub mod storage;
pub mod time;

pub use allocation::{AllocationRepository, AllocationState};
pub use entities::*;
pub use errors::*;
pub use hashing::{HashStrategy, Keccak256Strategy, Sha256Strategy};
pub use identity::{verify_signature, NodeIdentity};
pub use keys::KeyPrefix;
pub use storage::{
    decode, encode, BatchOperation, Condition, FileBackedKVStore, InMemoryKVStore, KeyValueStore,
};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
