//! Redemption cycles against the simulated chain.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bl_01_chain_gateway::{
    functions, ConfirmationPolicy, GatewayError, SimulatedLedger, TransactionGateway, TxnHash,
    TxnStatus,
};
use bl_04_write_marker_ledger::{
    LedgerError, MarkerLedger, MarkerStatus, WriteMarker, WriteMarkerEntity, WriteMarkerLedger,
};
use bl_05_redemption_scheduler::{RedemptionConfig, RedemptionScheduler, SchedulerState};
use shared_types::{
    hash_hex, Allocation, AllocationRepository, BatchOperation, Hash, InMemoryKVStore,
    KeyValueStore, ManualTimeSource,
};
use tokio::sync::watch;

// =============================================================================
// TEST HELPERS
// =============================================================================

struct Harness {
    ledger: Arc<WriteMarkerLedger>,
    chain: Arc<SimulatedLedger>,
}

fn harness(allocations: &[&str]) -> Harness {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKVStore::new());
    let repo = AllocationRepository::new(store.clone());
    for id in allocations {
        repo.put(&Allocation {
            id: (*id).into(),
            tx: "tx".into(),
            owner_id: "owner".into(),
            owner_public_key: [0; 32],
            payer_id: "owner".into(),
            size: 1 << 30,
            expiration: u64::MAX,
            finalized: false,
        })
        .unwrap();
    }
    Harness {
        ledger: Arc::new(WriteMarkerLedger::new(
            store,
            Arc::new(ManualTimeSource::new(100)),
        )),
        chain: Arc::new(SimulatedLedger::new()),
    }
}

fn marker(alloc: &str, root: u8, prev: Option<u8>) -> WriteMarker {
    WriteMarker {
        allocation_id: alloc.into(),
        allocation_root: [root; 32],
        previous_allocation_root: prev.map(|p| [p; 32]),
        blobber_id: "b1".into(),
        client_id: "owner".into(),
        size: 64,
        timestamp: 100,
        signature: vec![1, 2, 3],
    }
}

fn config() -> RedemptionConfig {
    RedemptionConfig::for_testing()
}

fn scheduler(
    ledger: Arc<dyn MarkerLedger>,
    chain: &Arc<SimulatedLedger>,
    config: RedemptionConfig,
) -> Arc<RedemptionScheduler> {
    Arc::new(RedemptionScheduler::new(ledger, chain.clone(), config))
}

/// Gateway that records how many calls are in flight at once.
struct CountingGateway {
    inner: Arc<SimulatedLedger>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingGateway {
    async fn tracked<T>(&self, call: impl std::future::Future<Output = T>) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let out = call.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

#[async_trait]
impl TransactionGateway for CountingGateway {
    async fn submit(
        &self,
        contract: &str,
        function: &str,
        payload: serde_json::Value,
    ) -> Result<TxnHash, GatewayError> {
        self.tracked(self.inner.submit(contract, function, payload)).await
    }

    async fn verify(&self, txn_hash: &str) -> Result<TxnStatus, GatewayError> {
        self.tracked(self.inner.verify(txn_hash)).await
    }
}

fn submitted_roots(chain: &SimulatedLedger) -> Vec<String> {
    chain
        .submissions_for(functions::COMMIT_CONNECTION)
        .iter()
        .map(|t| t.payload["allocation_root"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Delegating ledger whose first `mark_committed` fails, as if the process
/// died between chain confirmation and the local write.
struct CrashOnCommit {
    inner: Arc<WriteMarkerLedger>,
    failures: AtomicU32,
}

impl MarkerLedger for CrashOnCommit {
    fn create_with(
        &self,
        marker: WriteMarker,
        staged: Vec<BatchOperation>,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        self.inner.create_with(marker, staged)
    }

    fn get(&self, allocation_root: &Hash) -> Result<WriteMarkerEntity, LedgerError> {
        self.inner.get(allocation_root)
    }

    fn pending(&self, allocation_id: &str) -> Result<Vec<WriteMarkerEntity>, LedgerError> {
        self.inner.pending(allocation_id)
    }

    fn redeemed_root(&self, allocation_id: &str) -> Result<Option<Hash>, LedgerError> {
        self.inner.redeemed_root(allocation_id)
    }

    fn is_redeemable(&self, entity: &WriteMarkerEntity) -> Result<bool, LedgerError> {
        self.inner.is_redeemable(entity)
    }

    fn mark_submitted(
        &self,
        entity: &WriteMarkerEntity,
        txn_hash: &str,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        self.inner.mark_submitted(entity, txn_hash)
    }

    fn record_unverified(
        &self,
        entity: &WriteMarkerEntity,
        reason: &str,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        self.inner.record_unverified(entity, reason)
    }

    fn mark_committed(
        &self,
        entity: &WriteMarkerEntity,
        txn_hash: &str,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(LedgerError::Concurrent {
                allocation_id: entity.marker.allocation_id.clone(),
                key: "crash".into(),
            });
        }
        self.inner.mark_committed(entity, txn_hash)
    }

    fn mark_failed(
        &self,
        entity: &WriteMarkerEntity,
        reason: &str,
    ) -> Result<WriteMarkerEntity, LedgerError> {
        self.inner.mark_failed(entity, reason)
    }

    fn clear_redeem_required(&self, allocation_id: &str) -> Result<bool, LedgerError> {
        self.inner.clear_redeem_required(allocation_id)
    }

    fn allocations_requiring_redemption(&self) -> Result<Vec<String>, LedgerError> {
        self.inner.allocations_requiring_redemption()
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_chain_is_redeemed_in_order_and_flag_cleared() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    h.ledger.create(marker("a1", 2, Some(1))).unwrap();
    let s = scheduler(h.ledger.clone(), &h.chain, config());

    let report = s.run_cycle().await;

    assert_eq!(report.allocations, 1);
    assert_eq!(report.committed, 2);
    assert_eq!(report.settled, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), Some([2; 32]));
    assert_eq!(
        submitted_roots(&h.chain),
        vec![hash_hex(&[1; 32]), hash_hex(&[2; 32])]
    );
    assert!(h.ledger.allocations_requiring_redemption().unwrap().is_empty());
    assert_eq!(s.state(), SchedulerState::Idle);

    // A new session raises the flag again.
    h.ledger.create(marker("a1", 3, Some(2))).unwrap();
    assert_eq!(h.ledger.allocations_requiring_redemption().unwrap(), vec!["a1"]);
    let report = s.run_cycle().await;
    assert_eq!(report.committed, 1);
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), Some([3; 32]));
}

#[tokio::test(start_paused = true)]
async fn test_verification_exhaustion_defers_without_resubmitting() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    h.ledger.create(marker("a1", 2, Some(1))).unwrap();
    h.chain.set_confirmation_delay(100);
    let s = scheduler(h.ledger.clone(), &h.chain, config());

    let report = s.run_cycle().await;
    assert_eq!(report.deferred, 1);
    assert_eq!(report.committed, 0);
    assert_eq!(report.settled, 0);

    let first = h.ledger.get(&[1; 32]).unwrap();
    assert_eq!(first.status, MarkerStatus::Pending);
    assert!(first.close_txn_id.is_some());
    assert_eq!(first.unverified_rounds, 1);
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), None);
    assert_eq!(h.chain.submissions_for(functions::COMMIT_CONNECTION).len(), 1);

    h.chain.release_pending();
    h.chain.set_confirmation_delay(0);
    let report = s.run_cycle().await;

    assert_eq!(report.committed, 2);
    assert_eq!(report.settled, 1);
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), Some([2; 32]));
    // R1 was confirmed through its recorded transaction.
    assert_eq!(
        submitted_roots(&h.chain),
        vec![hash_hex(&[1; 32]), hash_hex(&[2; 32])]
    );
}

#[tokio::test(start_paused = true)]
async fn test_commit_lost_after_confirmation_is_recovered_by_verify() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    let flaky = Arc::new(CrashOnCommit {
        inner: h.ledger.clone(),
        failures: AtomicU32::new(1),
    });
    let s = scheduler(flaky, &h.chain, config());

    let report = s.run_cycle().await;
    assert_eq!(report.errors, 1);
    assert_eq!(h.ledger.status(&[1; 32]).unwrap(), MarkerStatus::Pending);
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), None);

    let report = s.run_cycle().await;
    assert_eq!(report.committed, 1);
    assert_eq!(report.settled, 1);
    assert_eq!(h.ledger.status(&[1; 32]).unwrap(), MarkerStatus::Committed);
    assert_eq!(h.chain.submissions_for(functions::COMMIT_CONNECTION).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_marker_does_not_block_successor() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    h.chain.reject_function(functions::COMMIT_CONNECTION);
    let s = scheduler(h.ledger.clone(), &h.chain, config());

    let report = s.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert_eq!(h.ledger.status(&[1; 32]).unwrap(), MarkerStatus::Failed);
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), None);

    // The next session still extends R1, the allocation root.
    h.chain.allow_function(functions::COMMIT_CONNECTION);
    h.ledger.create(marker("a1", 2, Some(1))).unwrap();
    let report = s.run_cycle().await;

    assert_eq!(report.committed, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.settled, 1);
    assert_eq!(h.ledger.status(&[2; 32]).unwrap(), MarkerStatus::Committed);
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), Some([2; 32]));
    assert!(h.ledger.allocations_requiring_redemption().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejection_mid_chain_moves_on_in_same_cycle() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    h.ledger.create(marker("a1", 2, Some(1))).unwrap();
    h.ledger.create(marker("a1", 3, Some(2))).unwrap();
    let s = scheduler(h.ledger.clone(), &h.chain, config());
    let first = h.ledger.get(&[1; 32]).unwrap();
    h.ledger.mark_committed(&first, "t1").unwrap();

    // R2 already has a redemption txn the contract refused.
    h.chain.reject_function(functions::COMMIT_CONNECTION);
    let second = h.ledger.pending("a1").unwrap().remove(0);
    let txn = h
        .chain
        .submit("storage", functions::COMMIT_CONNECTION, serde_json::json!({}))
        .await
        .unwrap();
    h.ledger.mark_submitted(&second, &txn).unwrap();
    h.chain.allow_function(functions::COMMIT_CONNECTION);

    let report = s.run_cycle().await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.committed, 1);
    assert_eq!(report.settled, 1);
    assert_eq!(h.ledger.status(&[2; 32]).unwrap(), MarkerStatus::Failed);
    assert_eq!(h.ledger.status(&[3; 32]).unwrap(), MarkerStatus::Committed);
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), Some([3; 32]));
}

#[tokio::test(start_paused = true)]
async fn test_flag_survives_root_returning_to_redeemed_value() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    let s = scheduler(h.ledger.clone(), &h.chain, config());
    assert_eq!(s.run_cycle().await.settled, 1);

    h.ledger.create(marker("a1", 2, Some(1))).unwrap();
    h.ledger.create(marker("a1", 1, Some(2))).unwrap();
    h.chain.fail_next_submissions(1);

    let report = s.run_cycle().await;
    assert_eq!(report.deferred, 1);
    assert_eq!(report.settled, 0);
    assert_eq!(h.ledger.allocations_requiring_redemption().unwrap(), vec!["a1"]);
    assert_eq!(h.ledger.pending("a1").unwrap().len(), 2);

    let report = s.run_cycle().await;
    assert_eq!(report.committed, 2);
    assert_eq!(report.settled, 1);
    assert!(h.ledger.pending("a1").unwrap().is_empty());
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), Some([1; 32]));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_txn_is_waited_on_before_resubmitting() {
    let h = harness(&["a1"]);
    let entity = h.ledger.create(marker("a1", 1, None)).unwrap();
    // Recorded before a restart; the chain has not seen it yet.
    h.ledger.mark_submitted(&entity, "not-yet-propagated").unwrap();
    let s = scheduler(h.ledger.clone(), &h.chain, config());

    let report = s.run_cycle().await;
    assert_eq!(report.deferred, 1);
    assert!(h.chain.submissions_for(functions::COMMIT_CONNECTION).is_empty());
    let entity = h.ledger.get(&[1; 32]).unwrap();
    assert_eq!(entity.close_txn_id.as_deref(), Some("not-yet-propagated"));
    assert_eq!(entity.txn_rounds, 1);

    // Still unknown after a full round: resubmit.
    let report = s.run_cycle().await;
    assert_eq!(report.committed, 1);
    assert_eq!(h.chain.submissions_for(functions::COMMIT_CONNECTION).len(), 1);
    assert_eq!(h.ledger.get(&[1; 32]).unwrap().redeem_attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unverified_limit_fails_marker() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    h.chain.set_verify_outage(true);
    let s = scheduler(
        h.ledger.clone(),
        &h.chain,
        RedemptionConfig {
            max_consecutive_unverified: Some(2),
            ..config()
        },
    );

    let report = s.run_cycle().await;
    assert_eq!(report.deferred, 1);
    assert_eq!(h.ledger.get(&[1; 32]).unwrap().unverified_rounds, 1);

    let report = s.run_cycle().await;
    assert_eq!(report.failed, 1);
    let entity = h.ledger.get(&[1; 32]).unwrap();
    assert_eq!(entity.status, MarkerStatus::Failed);
    assert!(entity.status_message.contains("consecutive unverified"));
    assert_eq!(h.chain.submissions_for(functions::COMMIT_CONNECTION).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_limit_outage_only_defers() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    h.chain.set_verify_outage(true);
    let s = scheduler(h.ledger.clone(), &h.chain, config());

    for _ in 0..4 {
        assert_eq!(s.run_cycle().await.deferred, 1);
    }
    let entity = h.ledger.get(&[1; 32]).unwrap();
    assert_eq!(entity.status, MarkerStatus::Pending);
    assert_eq!(entity.unverified_rounds, 4);
}

#[tokio::test(start_paused = true)]
async fn test_submission_failure_defers_and_retries() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    h.chain.fail_next_submissions(1);
    let s = scheduler(h.ledger.clone(), &h.chain, config());

    let report = s.run_cycle().await;
    assert_eq!(report.deferred, 1);
    assert!(h.ledger.get(&[1; 32]).unwrap().close_txn_id.is_none());

    let report = s.run_cycle().await;
    assert_eq!(report.committed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_allocations_redeemed_by_bounded_pool() {
    let h = harness(&["a1", "a2", "a3"]);
    for id in ["a1", "a2", "a3"] {
        h.ledger.create(marker(id, 1, None)).unwrap();
    }
    let gateway = Arc::new(CountingGateway {
        inner: h.chain.clone(),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let s = Arc::new(RedemptionScheduler::new(
        h.ledger.clone(),
        gateway.clone(),
        RedemptionConfig {
            num_workers: 2,
            confirmation: ConfirmationPolicy {
                interval_ms: 50,
                max_retries: 2,
            },
            ..config()
        },
    ));

    let report = s.run_cycle().await;
    assert_eq!(report.allocations, 3);
    assert_eq!(report.committed, 3);
    assert_eq!(report.settled, 3);

    let peak = gateway.peak.load(Ordering::SeqCst);
    assert_eq!(peak, 2, "two workers should overlap and never exceed the pool");
    assert_eq!(gateway.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_redeems_then_stops_on_shutdown() {
    let h = harness(&["a1"]);
    h.ledger.create(marker("a1", 1, None)).unwrap();
    let s = scheduler(h.ledger.clone(), &h.chain, config());
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(Arc::clone(&s).run(rx));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.ledger.redeemed_root("a1").unwrap(), Some([1; 32]));

    tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(s.state(), SchedulerState::Idle);
}
