//! Error types for the redemption scheduler

use bl_01_chain_gateway::GatewayError;
use bl_04_write_marker_ledger::LedgerError;
use thiserror::Error;

/// Failures that end one allocation's walk for this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedemptionError {
    /// Ledger read or transition failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Chain call failed outside the confirmation policy.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
