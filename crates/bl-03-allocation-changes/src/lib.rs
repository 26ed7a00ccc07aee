//! # Blobber - Allocation Changes (Subsystem 03)
//!
//! **Bounded Context:** Client Mutations of the Reference Tree
//!
//! ## Purpose
//!
//! A client uploads through a *connection*: every operation it declares
//! (new file, update, delete, rename, copy, move) is recorded as an
//! [`AllocationChange`] by the [`ChangeCollector`]. When the client commits
//! the connection with a signed write marker, the [`ChangeProcessor`] applies
//! the changes to a working copy of the reference tree and returns the
//! resulting root, which must match the root the client signed.
//!
//! ## Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Service                                            │
//! │  - ChangeProcessor: validate, mutate, rollup        │
//! │  - ChangeCollector: c:{alloc}:{conn}:{idx} rows     │
//! │  - CleanupWorker: deferred blob removal             │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Ports                                              │
//! │  - BlobStore (temp files, committed content)        │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Domain                                             │
//! │  - AllocationChange, ChangeOperation, FileUpload    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Validation Order
//!
//! Each change is validated against the current tree *before* anything is
//! mutated. A failing change returns [`ChangeError::InvalidReferencePath`],
//! [`ChangeError::FileNotFound`] or [`ChangeError::InvalidOperation`] and
//! leaves the working copy as it was. Nothing is persisted here: the caller
//! stages the tree together with the write marker.
//!
//! ## Blob Cleanup
//!
//! Content superseded by an update, or orphaned by a delete, is reported in
//! [`Applied::released`]. The caller hands it to the [`CleanupQueue`] once the
//! commit is durable; the [`CleanupWorker`] removes the blobs in the
//! background so the tree update never waits on disk I/O.

#![warn(clippy::all)]

pub mod adapters;
pub mod cleanup;
pub mod collector;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use adapters::memory::InMemoryBlobStore;
pub use cleanup::{cleanup_channel, CleanupQueue, CleanupTask, CleanupWorker};
pub use collector::ChangeCollector;
pub use domain::change::{AllocationChange, ChangeOperation, FileUpload};
pub use error::{BlobError, ChangeError};
pub use ports::{BlobFile, BlobStore};
pub use service::{Applied, ChangeProcessor};
