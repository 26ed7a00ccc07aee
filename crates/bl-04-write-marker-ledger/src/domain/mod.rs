//! Domain layer: write markers and their ledger records.

pub mod marker;
