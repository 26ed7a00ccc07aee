//! Periodic `blobber_health_check` transactions.

use std::sync::Arc;

use bl_01_chain_gateway::{
    await_confirmation, functions, Confirmation, TxnHash, STORAGE_CONTRACT_ADDRESS,
};
use serde_json::json;
use shared_types::TimeSource;
use tracing::{debug, error, info, warn};

use crate::workers::{ChainHandles, NodeProfile, WorkerError};

/// Result of one health-check round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthCheckOutcome {
    /// Transaction submitted; `confirmation` says whether it landed.
    Submitted {
        txn_hash: TxnHash,
        confirmation: Confirmation,
    },
    /// The blobber has been removed (zero capacity); nothing was sent.
    Removed,
}

pub struct HealthReporter {
    chain: ChainHandles,
    profile: NodeProfile,
    time: Arc<dyn TimeSource>,
}

impl HealthReporter {
    pub fn new(chain: ChainHandles, profile: NodeProfile, time: Arc<dyn TimeSource>) -> Self {
        Self {
            chain,
            profile,
            time,
        }
    }

    async fn is_removed(&self) -> bool {
        if self.profile.config.capacity == 0 {
            return true;
        }
        match self.chain.reader.get_blobber(&self.profile.id).await {
            Ok(Some(node)) => node.is_removed(),
            Ok(None) => false,
            Err(e) => {
                debug!("[runtime] Blobber lookup before health check failed: {}", e);
                false
            }
        }
    }

    pub async fn check_once(&self) -> Result<HealthCheckOutcome, WorkerError> {
        if self.is_removed().await {
            return Ok(HealthCheckOutcome::Removed);
        }

        let payload = json!({
            "id": self.profile.id,
            "timestamp": self.time.now(),
        });
        let txn_hash = self
            .chain
            .gateway
            .submit(STORAGE_CONTRACT_ADDRESS, functions::BLOBBER_HEALTH_CHECK, payload)
            .await?;
        let confirmation =
            await_confirmation(self.chain.gateway.as_ref(), &txn_hash, &self.chain.confirmation)
                .await;

        Ok(HealthCheckOutcome::Submitted {
            txn_hash,
            confirmation,
        })
    }

    /// One round with logging; used as the periodic job.
    pub async fn tick(&self) {
        match self.check_once().await {
            Ok(HealthCheckOutcome::Removed) => {
                debug!("[runtime] Blobber removed, health check skipped");
            }
            Ok(HealthCheckOutcome::Submitted {
                txn_hash,
                confirmation,
            }) => match confirmation {
                Confirmation::Confirmed { .. } => {
                    info!("[runtime] Health check {} verified", txn_hash)
                }
                Confirmation::Rejected { reason } => {
                    warn!("[runtime] Health check {} rejected: {}", txn_hash, reason)
                }
                Confirmation::Unverified { attempts, .. } => error!(
                    "[runtime] Health check {} could not be verified after {} attempts",
                    txn_hash, attempts
                ),
            },
            Err(e) => warn!("[runtime] Health check failed: {}", e),
        }
    }
}
