//! The storage-node record this blobber advertises.

use bl_01_chain_gateway::{
    usd_to_token_units, GatewayError, PriceFeed, StakePoolSettings, StorageNode, Terms,
};

use crate::container::config::BlobberConfig;
use crate::workers::WorkerError;

/// Identity plus configured terms.
#[derive(Debug, Clone)]
pub struct NodeProfile {
    pub id: String,
    pub config: BlobberConfig,
}

impl NodeProfile {
    pub fn new(id: impl Into<String>, config: BlobberConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }

    /// Whether `node` is this blobber (same id or same URL).
    pub fn matches(&self, node: &StorageNode) -> bool {
        node.id == self.id || node.url == self.config.url
    }

    /// Build the record, converting USD prices when configured.
    pub async fn storage_node(&self, prices: &dyn PriceFeed) -> Result<StorageNode, WorkerError> {
        let token_price = if self.config.price_in_usd {
            prices.token_price_usd().await?
        } else {
            1.0
        };
        self.storage_node_at(token_price)
    }

    /// Build the record at a known token price (USD per token).
    pub fn storage_node_at(&self, token_price: f64) -> Result<StorageNode, WorkerError> {
        let c = &self.config;
        let price = |amount: f64| {
            usd_to_token_units(amount, token_price).ok_or(WorkerError::InvalidPrice {
                amount,
                token_price,
            })
        };
        let tokens = |amount: f64| {
            usd_to_token_units(amount, 1.0).ok_or(WorkerError::InvalidPrice {
                amount,
                token_price: 1.0,
            })
        };

        Ok(StorageNode {
            id: self.id.clone(),
            url: c.url.clone(),
            terms: Terms {
                read_price: price(c.read_price)?,
                write_price: price(c.write_price)?,
                min_lock_demand: c.min_lock_demand,
                max_offer_duration: c.max_offer_duration_secs,
                challenge_completion_time: c.challenge_completion_time_secs,
            },
            capacity: c.capacity,
            used: 0,
            last_health_check: 0,
            stake_pool_settings: StakePoolSettings {
                delegate_wallet: c.stake_pool.delegate_wallet.clone(),
                min_stake: tokens(c.stake_pool.min_stake)?,
                max_stake: tokens(c.stake_pool.max_stake)?,
                num_delegates: c.stake_pool.num_delegates,
                service_charge: c.stake_pool.service_charge,
            },
        })
    }

    /// JSON payload of the record for `add_blobber` / `update_blobber_settings`.
    pub async fn payload(&self, prices: &dyn PriceFeed) -> Result<serde_json::Value, WorkerError> {
        let node = self.storage_node(prices).await?;
        serde_json::to_value(&node).map_err(|e| WorkerError::Gateway(GatewayError::from(e)))
    }
}
