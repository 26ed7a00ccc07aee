//! Gateway adapters.

pub mod json_rpc;
pub mod simulated;
