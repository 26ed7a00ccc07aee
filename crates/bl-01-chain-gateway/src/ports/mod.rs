//! # Outbound Ports
//!
//! What the blobber needs from the chain.

use async_trait::async_trait;

use crate::domain::storage_node::StorageNode;
use crate::domain::transaction::{TxnHash, TxnStatus};
use crate::error::GatewayError;

/// Submit and verify smart-contract transactions.
///
/// Production: [`crate::JsonRpcGateway`]
/// Testing: [`crate::SimulatedLedger`]
#[async_trait]
pub trait TransactionGateway: Send + Sync {
    /// Sign and submit a call to `function` on `contract`. Fire-once: the
    /// adapter never resubmits on its own.
    async fn submit(
        &self,
        contract: &str,
        function: &str,
        payload: serde_json::Value,
    ) -> Result<TxnHash, GatewayError>;

    /// Single status lookup. No retries.
    async fn verify(&self, txn_hash: &str) -> Result<TxnStatus, GatewayError>;
}

/// Read-only view of the storage contract.
#[async_trait]
pub trait StorageContractReader: Send + Sync {
    async fn get_blobber(&self, id: &str) -> Result<Option<StorageNode>, GatewayError>;

    async fn list_blobbers(&self) -> Result<Vec<StorageNode>, GatewayError>;
}

/// Token price oracle, used when prices are configured in USD.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn token_price_usd(&self) -> Result<f64, GatewayError>;
}
