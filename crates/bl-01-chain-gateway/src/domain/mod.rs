//! Domain layer of the chain gateway.

pub mod confirmation;
pub mod storage_node;
pub mod transaction;
