//! Domain layer of the reference tree.

pub mod node;
pub mod path;
pub mod tree;
