//! Outbound adapters owned by the node binary.

pub mod blob_store;
pub mod storage;

pub use blob_store::FsBlobStore;
