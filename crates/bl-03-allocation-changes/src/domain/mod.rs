//! Domain layer: change descriptors.

pub mod change;
