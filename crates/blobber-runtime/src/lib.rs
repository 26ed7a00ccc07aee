//! # Blobber Runtime Library
//!
//! Wiring, background routines and inbound handlers of the blobber node.
//! The entry point is the `blobber` binary in `main.rs`; the library exists
//! so the pieces can be exercised from integration tests.
//!
//! ## Layout
//!
//! - `container/` - configuration and the service container
//! - `bootstrap` - keys, store, blob store and chain ports from config
//! - `adapters/` - filesystem blob store, RocksDB store (feature `rocksdb`)
//! - `handlers/` - session commit and storage queries
//! - `workers/` - registration, health check, settings update
//! - `runtime` - task lifecycle and shutdown
//!
//! ## Write Path
//!
//! ```text
//! declare ──► ChangeCollector          (bl-03)
//! commit  ──► ChangeProcessor + TreeStore (bl-03, bl-02)
//!         ──► WriteMarkerLedger         (bl-04)   marker Pending
//! tick    ──► RedemptionScheduler       (bl-05)
//!         ──► TransactionGateway        (bl-01)   marker Committed
//! ```

#![warn(clippy::all)]
#![allow(clippy::type_complexity)]

pub mod adapters;
pub mod bootstrap;
pub mod container;
pub mod handlers;
pub mod runtime;
pub mod workers;

pub use container::{ConfigError, NodeConfig, ServiceContainer};
pub use runtime::BlobberRuntime;
