//! Domain layer: scheduler state, cycle reports, chain payloads.

pub mod payload;
pub mod state;
