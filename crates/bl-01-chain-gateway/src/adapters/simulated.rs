//! # Simulated Ledger
//!
//! In-process stand-in for the chain. Used by tests and by nodes started with
//! `chain.mode = "simulated"`. Transactions confirm after a configurable number
//! of verify calls; submissions, verifications and rejections can be scripted.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::storage_node::StorageNode;
use crate::domain::transaction::{functions, TxnHash, TxnStatus};
use crate::error::GatewayError;
use crate::ports::{PriceFeed, StorageContractReader, TransactionGateway};

/// A transaction as the simulated chain received it.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmittedTransaction {
    pub hash: TxnHash,
    pub contract: String,
    pub function: String,
    pub payload: serde_json::Value,
}

struct SimTxn {
    submitted: SubmittedTransaction,
    pending_verifies: u32,
    outcome: TxnStatus,
    applied: bool,
}

struct Inner {
    txns: HashMap<TxnHash, SimTxn>,
    order: Vec<TxnHash>,
    blobbers: BTreeMap<String, StorageNode>,
    token_price_usd: f64,
    confirm_after: u32,
    failing_submissions: u32,
    verify_outage: bool,
    rejected_functions: HashSet<String>,
    verify_calls: u64,
}

/// Scriptable in-memory chain.
pub struct SimulatedLedger {
    inner: Mutex<Inner>,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    /// Chain that confirms every transaction on the first verify.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                txns: HashMap::new(),
                order: Vec::new(),
                blobbers: BTreeMap::new(),
                token_price_usd: 1.0,
                confirm_after: 0,
                failing_submissions: 0,
                verify_outage: false,
                rejected_functions: HashSet::new(),
                verify_calls: 0,
            }),
        }
    }

    /// Transactions submitted from now on report `Pending` for `verifies` calls.
    pub fn set_confirmation_delay(&self, verifies: u32) {
        self.inner.lock().confirm_after = verifies;
    }

    /// The next `count` submissions fail with a transport error.
    pub fn fail_next_submissions(&self, count: u32) {
        self.inner.lock().failing_submissions = count;
    }

    /// While set, every verify call fails with a transport error.
    pub fn set_verify_outage(&self, down: bool) {
        self.inner.lock().verify_outage = down;
    }

    /// Transactions calling `function` are included but refused.
    pub fn reject_function(&self, function: &str) {
        self.inner.lock().rejected_functions.insert(function.to_string());
    }

    /// Undo [`SimulatedLedger::reject_function`] for later submissions.
    pub fn allow_function(&self, function: &str) {
        self.inner.lock().rejected_functions.remove(function);
    }

    /// Let every still-pending transaction confirm on its next verify.
    pub fn release_pending(&self) {
        for txn in self.inner.lock().txns.values_mut() {
            txn.pending_verifies = 0;
        }
    }

    pub fn register_blobber(&self, node: StorageNode) {
        self.inner.lock().blobbers.insert(node.id.clone(), node);
    }

    /// Mark a blobber as removed by the contract.
    pub fn remove_blobber(&self, id: &str) {
        if let Some(node) = self.inner.lock().blobbers.get_mut(id) {
            node.capacity = 0;
        }
    }

    pub fn set_token_price_usd(&self, price: f64) {
        self.inner.lock().token_price_usd = price;
    }

    /// All submissions in arrival order.
    pub fn submissions(&self) -> Vec<SubmittedTransaction> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|h| inner.txns.get(h).map(|t| t.submitted.clone()))
            .collect()
    }

    /// Submissions calling `function`.
    pub fn submissions_for(&self, function: &str) -> Vec<SubmittedTransaction> {
        self.submissions()
            .into_iter()
            .filter(|t| t.function == function)
            .collect()
    }

    pub fn verify_calls(&self) -> u64 {
        self.inner.lock().verify_calls
    }

    fn apply_effects(blobbers: &mut BTreeMap<String, StorageNode>, txn: &SubmittedTransaction) {
        match txn.function.as_str() {
            functions::ADD_BLOBBER | functions::UPDATE_BLOBBER_SETTINGS => {
                match serde_json::from_value::<StorageNode>(txn.payload.clone()) {
                    Ok(node) => {
                        blobbers.insert(node.id.clone(), node);
                    }
                    Err(e) => debug!("[bl-01] simulated chain ignored {}: {}", txn.function, e),
                }
            }
            functions::BLOBBER_HEALTH_CHECK => {
                let id = txn.payload.get("id").and_then(|v| v.as_str());
                let at = txn.payload.get("timestamp").and_then(|v| v.as_u64());
                if let (Some(id), Some(at)) = (id, at) {
                    if let Some(node) = blobbers.get_mut(id) {
                        node.last_health_check = at;
                    }
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl TransactionGateway for SimulatedLedger {
    async fn submit(
        &self,
        contract: &str,
        function: &str,
        payload: serde_json::Value,
    ) -> Result<TxnHash, GatewayError> {
        let mut inner = self.inner.lock();
        if inner.failing_submissions > 0 {
            inner.failing_submissions -= 1;
            return Err(GatewayError::Transport("simulated submission failure".into()));
        }

        let hash = format!("{:064x}", inner.order.len() + 1);
        let outcome = if inner.rejected_functions.contains(function) {
            TxnStatus::Rejected {
                reason: format!("{} refused by contract", function),
            }
        } else {
            TxnStatus::Confirmed {
                output: format!("{} ok", function),
            }
        };
        let pending_verifies = inner.confirm_after;
        inner.txns.insert(
            hash.clone(),
            SimTxn {
                submitted: SubmittedTransaction {
                    hash: hash.clone(),
                    contract: contract.to_string(),
                    function: function.to_string(),
                    payload,
                },
                pending_verifies,
                outcome,
                applied: false,
            },
        );
        inner.order.push(hash.clone());
        Ok(hash)
    }

    async fn verify(&self, txn_hash: &str) -> Result<TxnStatus, GatewayError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.verify_calls += 1;
        if inner.verify_outage {
            return Err(GatewayError::Transport("simulated verify outage".into()));
        }

        let txn = inner
            .txns
            .get_mut(txn_hash)
            .ok_or_else(|| GatewayError::NotFound(txn_hash.to_string()))?;
        if txn.pending_verifies > 0 {
            txn.pending_verifies -= 1;
            return Ok(TxnStatus::Pending);
        }
        if !txn.applied {
            txn.applied = true;
            if matches!(txn.outcome, TxnStatus::Confirmed { .. }) {
                Self::apply_effects(&mut inner.blobbers, &txn.submitted);
            }
        }
        Ok(txn.outcome.clone())
    }
}

#[async_trait]
impl StorageContractReader for SimulatedLedger {
    async fn get_blobber(&self, id: &str) -> Result<Option<StorageNode>, GatewayError> {
        Ok(self.inner.lock().blobbers.get(id).cloned())
    }

    async fn list_blobbers(&self) -> Result<Vec<StorageNode>, GatewayError> {
        Ok(self.inner.lock().blobbers.values().cloned().collect())
    }
}

#[async_trait]
impl PriceFeed for SimulatedLedger {
    async fn token_price_usd(&self) -> Result<f64, GatewayError> {
        Ok(self.inner.lock().token_price_usd)
    }
}
