//! # Redemption Scheduler Service
//!
//! One cycle:
//! 1. Scan allocations with the redeem flag set.
//! 2. Spawn one task per allocation, at most `num_workers` at a time.
//! 3. Each task walks pending markers in sequence order and redeems each one
//!    the ledger reports as next in line. A rejected marker is failed and the
//!    walk moves on to its successor; a deferral ends the walk.
//! 4. When the walk ends, clear the flag if no marker is left pending.
//!
//! Cycles never overlap: the next tick is taken only after every task of the
//! current cycle has been joined.

use std::sync::Arc;

use bl_01_chain_gateway::{
    await_confirmation, functions, Confirmation, GatewayError, TransactionGateway, TxnStatus,
    STORAGE_CONTRACT_ADDRESS,
};
use bl_04_write_marker_ledger::{MarkerLedger, WriteMarkerEntity};
use parking_lot::RwLock;
use shared_types::hash_hex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RedemptionConfig;
use crate::domain::payload::commit_connection_payload;
use crate::domain::state::{CycleReport, MarkerOutcome, SchedulerState};
use crate::error::RedemptionError;

/// Periodic write-marker redeemer.
pub struct RedemptionScheduler {
    ledger: Arc<dyn MarkerLedger>,
    gateway: Arc<dyn TransactionGateway>,
    config: RedemptionConfig,
    state: RwLock<SchedulerState>,
}

impl RedemptionScheduler {
    pub fn new(
        ledger: Arc<dyn MarkerLedger>,
        gateway: Arc<dyn TransactionGateway>,
        config: RedemptionConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            config,
            state: RwLock::new(SchedulerState::Idle),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    pub fn config(&self) -> &RedemptionConfig {
        &self.config
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.write() = state;
    }

    /// Run cycles every `frequency` until `shutdown` flips to true.
    ///
    /// A cycle in progress is finished before the loop observes shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.frequency();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "[bl-05] Redemption scheduler started (every {:?}, {} workers)",
            period, self.config.num_workers
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.allocations > 0 {
                        info!(
                            "[bl-05] Cycle done: {} allocations, {} committed, {} failed, {} deferred, {} settled",
                            report.allocations,
                            report.committed,
                            report.failed,
                            report.deferred,
                            report.settled
                        );
                    }
                }
            }
        }

        self.set_state(SchedulerState::Idle);
        info!("[bl-05] Redemption scheduler stopped");
    }

    /// One full scan-and-redeem pass. Returns once every allocation task has
    /// finished.
    pub async fn run_cycle(self: &Arc<Self>) -> CycleReport {
        let mut report = CycleReport::default();
        self.set_state(SchedulerState::Scanning);

        let allocations = match self.ledger.allocations_requiring_redemption() {
            Ok(ids) => ids,
            Err(e) => {
                error!("[bl-05] Scan for unredeemed allocations failed: {}", e);
                report.errors += 1;
                self.set_state(SchedulerState::Idle);
                return report;
            }
        };

        if allocations.is_empty() {
            self.set_state(SchedulerState::Idle);
            return report;
        }

        debug!("[bl-05] {} allocations need redemption", allocations.len());
        self.set_state(SchedulerState::RedeemingChain);

        let permits = Arc::new(Semaphore::new(self.config.num_workers.max(1)));
        let mut tasks = JoinSet::new();
        for allocation_id in allocations {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                this.redeem_allocation(&allocation_id).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(allocation_report) => report.merge(allocation_report),
                Err(e) => {
                    error!("[bl-05] Redemption task aborted: {}", e);
                    report.errors += 1;
                }
            }
        }

        self.set_state(SchedulerState::Idle);
        report
    }

    /// Walk one allocation's pending markers in chain order.
    pub async fn redeem_allocation(&self, allocation_id: &str) -> CycleReport {
        let mut report = CycleReport {
            allocations: 1,
            ..CycleReport::default()
        };

        let walk = async {
            for entity in self.ledger.pending(allocation_id)? {
                if !self.ledger.is_redeemable(&entity)? {
                    debug!(
                        "[bl-05] {} seq {} is not next in line, skipping",
                        allocation_id, entity.sequence
                    );
                    report.skipped += 1;
                    continue;
                }

                let root = entity.root();
                let outcome = self.redeem_marker(entity).await?;
                report.record(&outcome);
                match outcome {
                    MarkerOutcome::Committed => {}
                    MarkerOutcome::Failed { reason } => {
                        warn!(
                            "[bl-05] Marker {} of {} failed, moving to its successor: {}",
                            hash_hex(&root),
                            allocation_id,
                            reason
                        );
                    }
                    MarkerOutcome::Deferred { reason } => {
                        debug!(
                            "[bl-05] Marker {} of {} deferred: {}",
                            hash_hex(&root),
                            allocation_id,
                            reason
                        );
                        break;
                    }
                }
            }
            Ok::<_, RedemptionError>(())
        };

        if let Err(e) = walk.await {
            error!("[bl-05] Redeeming {} stopped: {}", allocation_id, e);
            report.errors += 1;
        }

        match self.ledger.clear_redeem_required(allocation_id) {
            Ok(true) => report.settled += 1,
            Ok(false) => {}
            Err(e) => {
                error!("[bl-05] Clearing redeem flag of {} failed: {}", allocation_id, e);
                report.errors += 1;
            }
        }

        report
    }

    /// Drive one marker to Committed, Failed, or a deferral.
    ///
    /// A marker that already has a redemption transaction is verified before
    /// anything is resubmitted. A transaction the chain does not know yet gets
    /// one full confirmation round before it is given up and resubmitted.
    async fn redeem_marker(
        &self,
        entity: WriteMarkerEntity,
    ) -> Result<MarkerOutcome, RedemptionError> {
        if let Some(txn) = entity.close_txn_id.clone() {
            match self.gateway.verify(&txn).await {
                Ok(TxnStatus::Confirmed { .. }) => {
                    self.ledger.mark_committed(&entity, &txn)?;
                    return Ok(MarkerOutcome::Committed);
                }
                Ok(TxnStatus::Rejected { reason }) => {
                    self.ledger.mark_failed(&entity, &reason)?;
                    return Ok(MarkerOutcome::Failed { reason });
                }
                Err(GatewayError::NotFound(_)) if entity.txn_rounds > 0 => {
                    debug!(
                        "[bl-05] Redemption txn {} still unknown after {} rounds, resubmitting",
                        txn, entity.txn_rounds
                    );
                }
                Ok(TxnStatus::Pending) | Err(_) => return self.settle(entity, &txn).await,
            }
        }

        let payload = commit_connection_payload(&entity.marker);
        let txn = match self
            .gateway
            .submit(STORAGE_CONTRACT_ADDRESS, functions::COMMIT_CONNECTION, payload)
            .await
        {
            Ok(txn) => txn,
            Err(GatewayError::Rejected(reason)) => {
                self.ledger.mark_failed(&entity, &reason)?;
                return Ok(MarkerOutcome::Failed { reason });
            }
            Err(e) => {
                return Ok(MarkerOutcome::Deferred {
                    reason: e.to_string(),
                });
            }
        };

        let entity = self.ledger.mark_submitted(&entity, &txn)?;
        self.settle(entity, &txn).await
    }

    async fn settle(
        &self,
        entity: WriteMarkerEntity,
        txn: &str,
    ) -> Result<MarkerOutcome, RedemptionError> {
        match await_confirmation(self.gateway.as_ref(), txn, &self.config.confirmation).await {
            Confirmation::Confirmed { .. } => {
                self.ledger.mark_committed(&entity, txn)?;
                info!(
                    "[bl-05] Redeemed {} seq {} ({})",
                    entity.marker.allocation_id, entity.sequence, txn
                );
                Ok(MarkerOutcome::Committed)
            }
            Confirmation::Rejected { reason } => {
                self.ledger.mark_failed(&entity, &reason)?;
                Ok(MarkerOutcome::Failed { reason })
            }
            Confirmation::Unverified {
                attempts,
                last_error,
            } => {
                let reason = match last_error {
                    Some(e) => format!("unverified after {} attempts: {}", attempts, e),
                    None => format!("unverified after {} attempts", attempts),
                };
                let entity = self.ledger.record_unverified(&entity, &reason)?;

                if let Some(limit) = self.config.max_consecutive_unverified {
                    if entity.unverified_rounds >= limit {
                        let reason = format!(
                            "{} consecutive unverified rounds: {}",
                            entity.unverified_rounds, reason
                        );
                        self.ledger.mark_failed(&entity, &reason)?;
                        return Ok(MarkerOutcome::Failed { reason });
                    }
                }

                warn!(
                    "[bl-05] Redemption {} of {} {}",
                    txn, entity.marker.allocation_id, reason
                );
                Ok(MarkerOutcome::Deferred { reason })
            }
        }
    }
}
