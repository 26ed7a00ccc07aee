//! On-chain registration (`add_blobber`).

use std::time::Duration;

use bl_01_chain_gateway::{
    await_confirmation, functions, Confirmation, TxnHash, STORAGE_CONTRACT_ADDRESS,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::workers::{ChainHandles, NodeProfile, WorkerError};

/// How registration ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// `add_blobber` was submitted and confirmed.
    Submitted { txn_hash: TxnHash },
    /// The chain already lists this blobber (same id or URL).
    AlreadyRegistered,
}

pub struct Registrar {
    chain: ChainHandles,
    profile: NodeProfile,
    max_attempts: u32,
    retry_interval: Duration,
}

impl Registrar {
    pub fn new(
        chain: ChainHandles,
        profile: NodeProfile,
        max_attempts: u32,
        retry_interval: Duration,
    ) -> Self {
        Self {
            chain,
            profile,
            max_attempts,
            retry_interval,
        }
    }

    /// One registration attempt.
    ///
    /// `Ok(None)` means the transaction went in but was not confirmed.
    pub async fn register_once(&self) -> Result<Option<RegistrationOutcome>, WorkerError> {
        let registered = self.chain.reader.list_blobbers().await?;
        if registered.iter().any(|node| self.profile.matches(node)) {
            return Ok(Some(RegistrationOutcome::AlreadyRegistered));
        }

        info!("[runtime] Adding blobber {} to the chain", self.profile.id);
        let payload = self.profile.payload(self.chain.prices.as_ref()).await?;
        let txn_hash = self
            .chain
            .gateway
            .submit(STORAGE_CONTRACT_ADDRESS, functions::ADD_BLOBBER, payload)
            .await?;

        match await_confirmation(self.chain.gateway.as_ref(), &txn_hash, &self.chain.confirmation)
            .await
        {
            Confirmation::Confirmed { output, .. } => {
                info!("[runtime] add_blobber {} confirmed: {}", txn_hash, output);
                Ok(Some(RegistrationOutcome::Submitted { txn_hash }))
            }
            Confirmation::Rejected { reason } => {
                warn!("[runtime] add_blobber {} rejected: {}", txn_hash, reason);
                Ok(None)
            }
            Confirmation::Unverified { attempts, last_error } => {
                error!(
                    "[runtime] add_blobber {} could not be verified after {} attempts ({})",
                    txn_hash,
                    attempts,
                    last_error.as_deref().unwrap_or("pending")
                );
                Ok(None)
            }
        }
    }

    /// Register with up to `max_attempts` attempts.
    pub async fn register(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RegistrationOutcome, WorkerError> {
        for attempt in 1..=self.max_attempts {
            if *shutdown.borrow() {
                return Err(WorkerError::Shutdown);
            }
            match self.register_once().await {
                Ok(Some(outcome)) => {
                    if outcome == RegistrationOutcome::AlreadyRegistered {
                        info!("[runtime] Blobber already registered on chain");
                    }
                    return Ok(outcome);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "[runtime] Registration attempt {}/{} failed: {}",
                    attempt, self.max_attempts, e
                ),
            }

            if attempt < self.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_interval) => {}
                    _ = shutdown.changed() => return Err(WorkerError::Shutdown),
                }
            }
        }
        Err(WorkerError::RegistrationExhausted {
            attempts: self.max_attempts,
        })
    }
}
