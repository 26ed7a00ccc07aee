//! # Background Routines
//!
//! On-chain upkeep of the blobber record:
//!
//! - `registration` - `add_blobber` once at startup, bounded attempts
//! - `health` - periodic `blobber_health_check`
//! - `settings` - periodic `update_blobber_settings` (USD pricing only)
//!
//! Every routine submits once and waits through the shared confirmation
//! policy. Failures are logged and retried on the next period.

pub mod health;
pub mod periodic;
pub mod profile;
pub mod registration;
pub mod settings;

use std::sync::Arc;

use bl_01_chain_gateway::{
    ConfirmationPolicy, GatewayError, PriceFeed, SimulatedLedger, StorageContractReader,
    TransactionGateway,
};
use thiserror::Error;

pub use health::{HealthCheckOutcome, HealthReporter};
pub use periodic::run_periodic;
pub use profile::NodeProfile;
pub use registration::{Registrar, RegistrationOutcome};
pub use settings::SettingsUpdater;

/// Chain ports shared by every routine.
#[derive(Clone)]
pub struct ChainHandles {
    pub gateway: Arc<dyn TransactionGateway>,
    pub reader: Arc<dyn StorageContractReader>,
    pub prices: Arc<dyn PriceFeed>,
    pub confirmation: ConfirmationPolicy,
}

impl ChainHandles {
    /// All three ports served by one simulated chain.
    pub fn simulated(chain: Arc<SimulatedLedger>, confirmation: ConfirmationPolicy) -> Self {
        Self {
            gateway: chain.clone(),
            reader: chain.clone(),
            prices: chain,
            confirmation,
        }
    }
}

/// Background routine errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    /// Chain call failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A price could not be converted to token units.
    #[error("Cannot price {amount} at token price {token_price}")]
    InvalidPrice {
        /// Configured amount
        amount: f64,
        /// USD per token
        token_price: f64,
    },

    /// Registration was not confirmed within the configured attempts.
    #[error("Registration not confirmed after {attempts} attempts")]
    RegistrationExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// Shutdown was requested before the routine finished.
    #[error("Shutdown requested")]
    Shutdown,
}
