//! Blob store adapters.

pub mod memory;
