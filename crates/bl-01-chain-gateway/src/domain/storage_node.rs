//! Blobber registration record as held by the storage contract.

use serde::{Deserialize, Serialize};
use shared_types::Timestamp;

/// Smallest token denomination per token.
pub const TOKEN_UNIT: u64 = 10_000_000_000;

/// Pricing and service terms offered by a blobber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Terms {
    /// Price per GB read, in token units.
    pub read_price: u64,
    /// Price per GB written, in token units.
    pub write_price: u64,
    /// Fraction of the write price locked up front (0..=1).
    pub min_lock_demand: f64,
    /// Longest allocation accepted, in seconds.
    pub max_offer_duration: u64,
    /// Time allowed to answer a challenge, in seconds.
    pub challenge_completion_time: u64,
}

/// Delegate stake pool settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StakePoolSettings {
    pub delegate_wallet: String,
    pub min_stake: u64,
    pub max_stake: u64,
    pub num_delegates: u32,
    pub service_charge: f64,
}

/// A blobber as registered on chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageNode {
    pub id: String,
    pub url: String,
    pub terms: Terms,
    /// Offered capacity in bytes. Zero once the blobber has been removed.
    pub capacity: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub last_health_check: Timestamp,
    pub stake_pool_settings: StakePoolSettings,
}

impl StorageNode {
    /// The contract zeroes capacity when it removes a blobber.
    pub fn is_removed(&self) -> bool {
        self.capacity == 0
    }
}

/// Convert a USD price to token units at `token_price_usd` per token.
pub fn usd_to_token_units(usd: f64, token_price_usd: f64) -> Option<u64> {
    if token_price_usd.is_nan() || token_price_usd <= 0.0 || usd < 0.0 {
        return None;
    }
    Some(((usd / token_price_usd) * TOKEN_UNIT as f64).round() as u64)
}
