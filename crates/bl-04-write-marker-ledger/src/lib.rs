//! # Blobber - Write-Marker Ledger (Subsystem 04)
//!
//! **Bounded Context:** Append-Only Record of Allocation Roots
//!
//! ## Purpose
//!
//! Each committed connection produces a client-signed [`WriteMarker`]
//! linking the previous allocation root to the new one. The ledger stores
//! markers with a per-allocation sequence and tracks which of them have been
//! redeemed on chain.
//!
//! ## Marker Chain
//!
//! ```text
//!   seq 1            seq 2            seq 3
//!   (-  -> R1) ───► (R1 -> R2) ───► (R2 -> R3)        allocation root = R3
//!        ▲
//!        └── redeemed pointer (lr) advances one link per Committed marker
//! ```
//!
//! ## Guarantees
//!
//! - **Chain check at insert**: a marker is accepted only if its previous
//!   root equals the persisted allocation root, enforced by a guarded batch.
//!   Of two racing writers with the same previous root, exactly one wins; the
//!   other gets [`LedgerError::SequenceConflict`].
//! - **Monotonic pointer**: `Pending -> Committed` and the redeemed-pointer
//!   move are one guarded batch conditioned on the pointer still being the
//!   marker's previous root, so Committed markers always form a gap-free
//!   prefix of the chain.
//! - **Never deleted**: markers only change status.

#![warn(clippy::all)]

pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use domain::marker::{MarkerStatus, WriteMarker, WriteMarkerEntity};
pub use error::LedgerError;
pub use ports::MarkerLedger;
pub use service::WriteMarkerLedger;
