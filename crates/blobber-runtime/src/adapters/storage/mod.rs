//! # Durable Storage Adapters
//!
//! RocksDB backs the metadata store in production. Enable with:
//!
//! ```toml
//! blobber-runtime = { path = "...", features = ["rocksdb"] }
//! ```
//!
//! Every record family lives under its own key prefix (see
//! `shared_types::KeyPrefix`), so a single default column family is enough.

#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;

#[cfg(feature = "rocksdb")]
pub use rocksdb_adapter::{RocksDbConfig, RocksDbStore};
