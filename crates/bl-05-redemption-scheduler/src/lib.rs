//! # Blobber - Redemption Scheduler (Subsystem 05)
//!
//! **Bounded Context:** Write-Marker Redemption
//!
//! ## Purpose
//!
//! Every committed session leaves a Pending write marker. This crate submits
//! those markers to the storage contract (`commit_connection`) and moves the
//! allocation's redeemed pointer forward as the chain confirms them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  RedemptionScheduler::run (interval, watch shutdown)     │
//! │    └─ run_cycle                                          │
//! │         ├─ MarkerLedger::allocations_requiring_redemption│
//! │         └─ JoinSet, Semaphore(num_workers)               │
//! │              └─ redeem_allocation (sequence order)       │
//! │                   ├─ TransactionGateway::submit / verify │
//! │                   └─ MarkerLedger transitions            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - A marker is submitted only when its previous root equals the redeemed
//!   pointer, so markers of one allocation are redeemed in chain order.
//! - A marker that already has a transaction is verified before any
//!   resubmission; a restart between confirmation and the local commit never
//!   redeems twice.
//! - Verification exhaustion defers; only an explicit rejection (or the
//!   optional unverified-round limit) fails a marker.
//! - The redeem flag of an allocation is cleared only when its redeemed
//!   pointer equals its current root.

#![warn(clippy::all)]

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::RedemptionConfig;
pub use domain::payload::commit_connection_payload;
pub use domain::state::{CycleReport, MarkerOutcome, SchedulerState};
pub use error::RedemptionError;
pub use service::RedemptionScheduler;
