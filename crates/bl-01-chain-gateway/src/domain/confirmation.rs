//! # Confirmation Policy
//!
//! Submission is fire-once; confirmation is polled: sleep the configured
//! interval, verify once, repeat up to `max_retries`. Redemption, registration,
//! health checks and settings updates all wait through this one function.

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::domain::transaction::TxnStatus;
use crate::ports::TransactionGateway;

/// How long and how often to poll for a transaction.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfirmationPolicy {
    /// Sleep before each verify call, in milliseconds.
    pub interval_ms: u64,
    /// Verify attempts before giving up for this round.
    pub max_retries: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            max_retries: 10,
        }
    }
}

impl ConfirmationPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Result of waiting for one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// The chain accepted the transaction.
    Confirmed {
        /// Contract output
        output: String,
        /// Verify calls made
        attempts: u32,
    },
    /// The chain included and refused the transaction.
    Rejected {
        /// Contract error
        reason: String,
    },
    /// No verdict within the policy. The transaction may still confirm.
    Unverified {
        /// Verify calls made
        attempts: u32,
        /// Last transport error, if any
        last_error: Option<String>,
    },
}

impl Confirmation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed { .. })
    }
}

/// Poll `txn_hash` under `policy`.
pub async fn await_confirmation(
    gateway: &dyn TransactionGateway,
    txn_hash: &str,
    policy: &ConfirmationPolicy,
) -> Confirmation {
    let mut last_error = None;

    for attempt in 1..=policy.max_retries {
        tokio::time::sleep(policy.interval()).await;

        match gateway.verify(txn_hash).await {
            Ok(TxnStatus::Confirmed { output }) => {
                return Confirmation::Confirmed {
                    output,
                    attempts: attempt,
                };
            }
            Ok(TxnStatus::Rejected { reason }) => {
                return Confirmation::Rejected { reason };
            }
            Ok(TxnStatus::Pending) => {
                debug!("[bl-01] txn {} pending (attempt {})", txn_hash, attempt);
            }
            Err(e) => {
                debug!("[bl-01] verify {} failed (attempt {}): {}", txn_hash, attempt, e);
                last_error = Some(e.to_string());
            }
        }
    }

    Confirmation::Unverified {
        attempts: policy.max_retries,
        last_error,
    }
}
