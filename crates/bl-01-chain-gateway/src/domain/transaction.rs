//! # Transactions
//!
//! A smart-contract call is a transaction whose data is
//! `{"name": <function>, "input": <payload>}`, addressed to the contract and
//! signed by the node identity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared_types::{hash_hex, HashStrategy, NodeIdentity, TimeSource, Timestamp};

use crate::error::GatewayError;

/// Hex transaction hash.
pub type TxnHash = String;

/// Storage smart-contract address.
pub const STORAGE_CONTRACT_ADDRESS: &str =
    "6dba10422e368813802877a85039d3985d96760ed844092319743fb3a76712d7";

/// Storage contract function names.
pub mod functions {
    pub const ADD_BLOBBER: &str = "add_blobber";
    pub const BLOBBER_HEALTH_CHECK: &str = "blobber_health_check";
    pub const UPDATE_BLOBBER_SETTINGS: &str = "update_blobber_settings";
    pub const COMMIT_CONNECTION: &str = "commit_connection";
}

/// Smart-contract transaction type.
pub const SMART_CONTRACT_TXN_TYPE: u32 = 1000;

/// Signed transaction as submitted to the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: TxnHash,
    pub client_id: String,
    pub public_key: String,
    pub to_client_id: String,
    pub value: u64,
    pub nonce: u64,
    pub transaction_data: String,
    pub transaction_type: u32,
    pub creation_date: Timestamp,
    pub signature: String,
}

impl Transaction {
    /// Contract function name encoded in `transaction_data`.
    pub fn function_name(&self) -> Option<String> {
        let data: serde_json::Value = serde_json::from_str(&self.transaction_data).ok()?;
        data.get("name")?.as_str().map(str::to_string)
    }

    /// Contract input encoded in `transaction_data`.
    pub fn input(&self) -> Option<serde_json::Value> {
        let mut data: serde_json::Value = serde_json::from_str(&self.transaction_data).ok()?;
        data.get_mut("input").map(serde_json::Value::take)
    }
}

/// Chain-side status of a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxnStatus {
    /// Included in a finalized block; `output` is the contract's response.
    Confirmed { output: String },
    /// Not yet included.
    Pending,
    /// Included but the contract refused it.
    Rejected { reason: String },
}

/// Builds and signs contract-call transactions for one node identity.
pub struct TransactionBuilder {
    identity: NodeIdentity,
    strategy: Arc<dyn HashStrategy>,
    time: Arc<dyn TimeSource>,
    nonce: AtomicU64,
}

impl TransactionBuilder {
    pub fn new(
        identity: NodeIdentity,
        strategy: Arc<dyn HashStrategy>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            identity,
            strategy,
            time,
            nonce: AtomicU64::new(0),
        }
    }

    /// Client id of the signing identity.
    pub fn client_id(&self) -> String {
        self.identity.id()
    }

    pub fn build(
        &self,
        contract: &str,
        function: &str,
        payload: serde_json::Value,
    ) -> Result<Transaction, GatewayError> {
        let transaction_data = serde_json::to_string(&serde_json::json!({
            "name": function,
            "input": payload,
        }))?;
        let client_id = self.identity.id();
        let creation_date = self.time.now();
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;

        let data_hash = hash_hex(&self.strategy.digest(&[transaction_data.as_bytes()]));
        let hash = hash_hex(&self.strategy.digest(&[
            creation_date.to_string().as_bytes(),
            nonce.to_string().as_bytes(),
            client_id.as_bytes(),
            contract.as_bytes(),
            b"0",
            data_hash.as_bytes(),
        ]));
        let signature = hex::encode(self.identity.sign(hash.as_bytes()));

        Ok(Transaction {
            hash,
            client_id,
            public_key: hex::encode(self.identity.public_key()),
            to_client_id: contract.to_string(),
            value: 0,
            nonce,
            transaction_data,
            transaction_type: SMART_CONTRACT_TXN_TYPE,
            creation_date,
            signature,
        })
    }
}
