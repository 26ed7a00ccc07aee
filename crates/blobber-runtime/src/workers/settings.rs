//! Periodic `update_blobber_settings` transactions.
//!
//! Only runs when prices are configured in USD: the token-denominated terms
//! drift with the token price and are re-sent every period.

use bl_01_chain_gateway::{
    await_confirmation, functions, Confirmation, STORAGE_CONTRACT_ADDRESS,
};
use tracing::{error, info, warn};

use crate::workers::{ChainHandles, NodeProfile, WorkerError};

pub struct SettingsUpdater {
    chain: ChainHandles,
    profile: NodeProfile,
}

impl SettingsUpdater {
    pub fn new(chain: ChainHandles, profile: NodeProfile) -> Self {
        Self { chain, profile }
    }

    pub async fn update_once(&self) -> Result<Confirmation, WorkerError> {
        let payload = self.profile.payload(self.chain.prices.as_ref()).await?;
        let txn_hash = self
            .chain
            .gateway
            .submit(
                STORAGE_CONTRACT_ADDRESS,
                functions::UPDATE_BLOBBER_SETTINGS,
                payload,
            )
            .await?;

        let confirmation =
            await_confirmation(self.chain.gateway.as_ref(), &txn_hash, &self.chain.confirmation)
                .await;
        match &confirmation {
            Confirmation::Confirmed { .. } => info!("[runtime] Settings update {} verified", txn_hash),
            Confirmation::Rejected { reason } => {
                warn!("[runtime] Settings update {} rejected: {}", txn_hash, reason)
            }
            Confirmation::Unverified { attempts, .. } => error!(
                "[runtime] Settings update {} could not be verified after {} attempts",
                txn_hash, attempts
            ),
        }
        Ok(confirmation)
    }

    pub async fn tick(&self) {
        if let Err(e) = self.update_once().await {
            warn!("[runtime] Settings update failed: {}", e);
        }
    }
}
