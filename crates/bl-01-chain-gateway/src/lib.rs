//! # Blobber - Chain Gateway (Subsystem 01)
//!
//! **Bounded Context:** Blockchain Transaction Submission & Confirmation
//!
//! ## Purpose
//!
//! Every on-chain effect of the blobber (registration, health checks,
//! settings updates, write-marker redemption) goes through this crate:
//! - Build and sign a transaction against a smart-contract function
//! - Submit it once (fire-once, no internal retry)
//! - Poll for confirmation under one shared [`ConfirmationPolicy`]
//!
//! ## Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Adapters                                           │
//! │  - JsonRpcGateway: reqwest JSON-RPC client          │
//! │  - SimulatedLedger: in-process chain for tests/dev  │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Ports                                              │
//! │  - TransactionGateway, StorageContractReader,       │
//! │    PriceFeed                                        │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Domain                                             │
//! │  - Transaction building/signing                     │
//! │  - await_confirmation (sleep, verify, bounded)      │
//! │  - StorageNode terms and stake pool settings        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Confirmation Outcomes
//!
//! Verification exhaustion is never fatal: [`Confirmation::Unverified`] is
//! handed back to the caller, which logs it and tries again on its next
//! period. Only an explicit chain rejection is reported as
//! [`Confirmation::Rejected`].

#![warn(clippy::all)]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use adapters::json_rpc::JsonRpcGateway;
pub use adapters::simulated::{SimulatedLedger, SubmittedTransaction};
pub use config::GatewayConfig;
pub use domain::confirmation::{await_confirmation, Confirmation, ConfirmationPolicy};
pub use domain::storage_node::{
    usd_to_token_units, StakePoolSettings, StorageNode, Terms, TOKEN_UNIT,
};
pub use domain::transaction::{
    functions, Transaction, TransactionBuilder, TxnHash, TxnStatus, STORAGE_CONTRACT_ADDRESS,
};
pub use error::GatewayError;
pub use ports::{PriceFeed, StorageContractReader, TransactionGateway};
