//! Configuration for write-marker redemption

use std::time::Duration;

use bl_01_chain_gateway::ConfirmationPolicy;
use serde::Deserialize;

/// `[writemarker_redeem]` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedemptionConfig {
    /// Seconds between scans.
    pub frequency_secs: u64,
    /// Allocations redeemed concurrently.
    pub num_workers: usize,
    /// Mark a marker Failed after this many consecutive confirmation rounds
    /// without a verdict. `None` keeps retrying forever.
    pub max_consecutive_unverified: Option<u32>,
    /// Polling for each redemption transaction.
    pub confirmation: ConfirmationPolicy,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            frequency_secs: 10,
            num_workers: 5,
            max_consecutive_unverified: None,
            confirmation: ConfirmationPolicy::default(),
        }
    }
}

impl RedemptionConfig {
    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency_secs)
    }

    /// Fast settings for tests.
    pub fn for_testing() -> Self {
        Self {
            frequency_secs: 1,
            num_workers: 2,
            max_consecutive_unverified: None,
            confirmation: ConfirmationPolicy {
                interval_ms: 10,
                max_retries: 3,
            },
        }
    }
}
