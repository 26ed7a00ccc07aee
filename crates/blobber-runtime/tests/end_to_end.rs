//! Full write path through the runtime: declare, commit, redeem, query.
//!
//! Everything runs in-process: in-memory metadata and blob stores, the
//! simulated chain, and a manual clock.

use std::sync::Arc;
use std::time::Duration;

use bl_01_chain_gateway::{functions, ConfirmationPolicy, SimulatedLedger, StorageContractReader};
use bl_03_allocation_changes::{
    cleanup_channel, AllocationChange, ChangeOperation, ChangeProcessor, FileUpload,
    InMemoryBlobStore,
};
use bl_04_write_marker_ledger::{MarkerStatus, WriteMarker};
use bl_05_redemption_scheduler::RedemptionConfig;
use blobber_runtime::handlers::{CommitError, QueryError};
use blobber_runtime::workers::{ChainHandles, RegistrationOutcome};
use blobber_runtime::{BlobberRuntime, NodeConfig, ServiceContainer};
use shared_types::{Allocation, Hash, InMemoryKVStore, ManualTimeSource, NodeIdentity};

const ALLOC: &str = "alloc-1";
const PAYER: &str = "payer-1";
const NOW: u64 = 1_000;

// =============================================================================
// TEST HELPERS
// =============================================================================

struct Node {
    container: Arc<ServiceContainer>,
    chain: Arc<SimulatedLedger>,
    blobs: Arc<InMemoryBlobStore>,
    clock: Arc<ManualTimeSource>,
    client: NodeIdentity,
}

fn node() -> Node {
    let config = NodeConfig {
        writemarker_redeem: RedemptionConfig::for_testing(),
        ..NodeConfig::default()
    };
    let chain = Arc::new(SimulatedLedger::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let clock = Arc::new(ManualTimeSource::new(NOW));
    let container = ServiceContainer::new(
        config,
        NodeIdentity::generate(),
        Arc::new(InMemoryKVStore::new()),
        blobs.clone(),
        ChainHandles::simulated(
            chain.clone(),
            ConfirmationPolicy {
                interval_ms: 10,
                max_retries: 3,
            },
        ),
        clock.clone(),
    );

    let client = NodeIdentity::generate();
    container
        .allocations
        .put(&Allocation {
            id: ALLOC.into(),
            tx: "tx-1".into(),
            owner_id: client.id(),
            owner_public_key: client.public_key(),
            payer_id: PAYER.into(),
            size: 1 << 20,
            expiration: 10_000,
            finalized: false,
        })
        .unwrap();

    Node {
        container: Arc::new(container),
        chain,
        blobs,
        clock,
        client,
    }
}

fn upload(connection: &str, path: &str, content_hash: &str, size: u64) -> AllocationChange {
    AllocationChange::new(
        ALLOC,
        connection,
        size as i64,
        ChangeOperation::NewFile(FileUpload {
            path: path.into(),
            size,
            content_hash: content_hash.into(),
            actual_file_size: size,
            mime_type: "text/plain".into(),
            ..FileUpload::default()
        }),
    )
}

impl Node {
    async fn declare(&self, change: &AllocationChange, data: &[u8]) {
        self.container
            .commit
            .declare(change, Some(data))
            .await
            .unwrap();
    }

    /// Root the client computes by replaying its changes on the current tree.
    fn expected_root(&self, connection: &str) -> Hash {
        let (queue, _worker) = cleanup_channel(Arc::new(InMemoryBlobStore::new()));
        let processor = ChangeProcessor::new(self.clock.clone(), queue);
        let changes = self.container.collector.changes(ALLOC, connection).unwrap();
        let mut tree = self.container.trees.load(ALLOC).unwrap();
        processor
            .apply_all(&mut tree, &changes, [0; 32])
            .unwrap()
            .root_hash()
    }

    fn marker(&self, root: Hash, previous: Option<Hash>, size: i64) -> WriteMarker {
        WriteMarker {
            allocation_id: ALLOC.into(),
            allocation_root: root,
            previous_allocation_root: previous,
            blobber_id: self.container.blobber_id(),
            client_id: self.client.id(),
            size,
            timestamp: NOW,
            signature: Vec::new(),
        }
        .signed_by(&self.client)
    }

    /// Declare one upload on `connection` and commit it.
    async fn write_file(&self, connection: &str, path: &str, content: &str) -> Hash {
        self.declare(&upload(connection, path, content, 5), b"bytes")
            .await;
        let root = self.expected_root(connection);
        let previous = self.container.allocations.root(ALLOC).unwrap();
        self.container
            .commit
            .commit(connection, self.marker(root, previous, 5))
            .await
            .unwrap();
        root
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_upload_commit_redeem_and_query() {
    let node = node();
    let c = &node.container;

    node.declare(&upload("conn-1", "/docs/a.txt", "c1", 5), b"hello")
        .await;
    let root = node.expected_root("conn-1");
    let result = c
        .commit
        .commit("conn-1", node.marker(root, None, 5))
        .await
        .unwrap();

    assert_eq!(result.entity.sequence, 1);
    assert_eq!(result.entity.status, MarkerStatus::Pending);
    assert_eq!(node.blobs.content(ALLOC, "c1"), Some(b"hello".to_vec()));
    assert!(c.collector.changes(ALLOC, "conn-1").unwrap().is_empty());

    let details = c.query.allocation_details(ALLOC).unwrap();
    assert_eq!(details.allocation_root, Some(root));
    assert!(details.is_redeem_required);
    assert_eq!(details.latest_redeemed_write_marker, None);

    let report = c.scheduler.run_cycle().await;
    assert_eq!(report.committed, 1);
    assert_eq!(c.query.marker_status(&root).unwrap(), MarkerStatus::Committed);
    assert_eq!(
        node.chain.submissions_for(functions::COMMIT_CONNECTION).len(),
        1
    );

    let details = c.query.allocation_details(ALLOC).unwrap();
    assert_eq!(details.latest_redeemed_write_marker, Some(root));
    assert!(!details.is_redeem_required);

    // Payer may read file metadata; only the owner may list.
    let lookup = c.trees.strategy().lookup_hash(ALLOC, "/docs/a.txt");
    let meta = c.query.file_meta(ALLOC, PAYER, &lookup).unwrap();
    assert_eq!(meta.file().unwrap().content_hash, "c1");
    assert_eq!(meta.file().unwrap().write_marker, Some(root));
    assert!(matches!(
        c.query.list_entities(ALLOC, PAYER, "/docs"),
        Err(QueryError::Unauthorized { .. })
    ));

    let owner = node.client.id();
    let listing = c.query.list_entities(ALLOC, &owner, "/docs").unwrap();
    assert_eq!(listing.entities.len(), 1);
    assert_eq!(listing.allocation_root, Some(root));

    let path = c.query.reference_path(ALLOC, &owner, "/docs/a.txt").unwrap();
    assert_eq!(path.nodes.len(), 3);
    assert_eq!(path.nodes[0].hash, root);

    let tree = c.query.object_tree(ALLOC, &owner, "/").unwrap();
    assert_eq!(tree.tree.count(), 3);
    assert_eq!(tree.latest_write_marker.unwrap().root(), root);

    assert_eq!(
        c.query.calculate_hash(ALLOC, &owner, &["/docs"]).unwrap(),
        root
    );

    let latest = c.query.latest_markers(ALLOC).unwrap();
    assert_eq!(latest.latest.unwrap().root(), root);
    assert_eq!(latest.latest_redeemed.unwrap().root(), root);
}

#[tokio::test(start_paused = true)]
async fn test_two_sessions_redeem_in_order() {
    let node = node();
    let r1 = node.write_file("conn-1", "/a.txt", "c1").await;
    let r2 = node.write_file("conn-2", "/b.txt", "c2").await;
    assert_ne!(r1, r2);

    node.container.scheduler.run_cycle().await;

    let subs = node.chain.submissions_for(functions::COMMIT_CONNECTION);
    assert_eq!(subs.len(), 2);
    let q = &node.container.query;
    assert_eq!(q.marker_status(&r1).unwrap(), MarkerStatus::Committed);
    assert_eq!(q.marker_status(&r2).unwrap(), MarkerStatus::Committed);
    let details = q.allocation_details(ALLOC).unwrap();
    assert_eq!(details.latest_redeemed_write_marker, Some(r2));
    assert!(!details.is_redeem_required);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_markers_leave_the_tree_unchanged() {
    let node = node();
    let c = &node.container;
    let r1 = node.write_file("conn-1", "/a.txt", "c1").await;

    node.declare(&upload("conn-2", "/b.txt", "c2", 5), b"bytes")
        .await;
    let r2 = node.expected_root("conn-2");

    // Extends the empty root, which is no longer current.
    assert!(matches!(
        c.commit.commit("conn-2", node.marker(r2, None, 5)).await,
        Err(CommitError::StaleRoot { .. })
    ));

    // Signs a root the changes do not produce.
    assert!(matches!(
        c.commit.commit("conn-2", node.marker([9; 32], Some(r1), 5)).await,
        Err(CommitError::RootMismatch { .. })
    ));

    // Wrong size.
    assert!(matches!(
        c.commit.commit("conn-2", node.marker(r2, Some(r1), 6)).await,
        Err(CommitError::SizeMismatch { marker: 6, changes: 5 })
    ));

    // Signed by someone else.
    let forged = WriteMarker {
        signature: Vec::new(),
        ..node.marker(r2, Some(r1), 5)
    }
    .signed_by(&NodeIdentity::generate());
    assert!(matches!(
        c.commit.commit("conn-2", forged).await,
        Err(CommitError::BadSignature(_))
    ));

    assert_eq!(c.allocations.root(ALLOC).unwrap(), Some(r1));
    let owner = node.client.id();
    assert_eq!(c.query.list_entities(ALLOC, &owner, "/").unwrap().entities.len(), 1);
    assert_eq!(node.blobs.content(ALLOC, "c2"), None);

    // The connection is intact and commits with the right marker.
    let result = c
        .commit
        .commit("conn-2", node.marker(r2, Some(r1), 5))
        .await
        .unwrap();
    assert_eq!(result.entity.sequence, 2);
    assert_eq!(c.query.list_entities(ALLOC, &owner, "/").unwrap().entities.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_directory_fails_structurally() {
    let node = node();
    let c = &node.container;
    let change = AllocationChange::new(
        ALLOC,
        "conn-1",
        0,
        ChangeOperation::UpdateFile(FileUpload {
            path: "/docs/a.txt".into(),
            content_hash: "c1".into(),
            ..FileUpload::default()
        }),
    );
    c.commit.declare(&change, None).await.unwrap();

    let err = c
        .commit
        .commit("conn-1", node.marker([1; 32], None, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommitError::Change(ref e) if e.is_structural()
    ));
    assert_eq!(c.allocations.root(ALLOC).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_discard_drops_connection() {
    let node = node();
    let c = &node.container;
    node.declare(&upload("conn-1", "/a.txt", "c1", 5), b"hello")
        .await;
    node.declare(&upload("conn-1", "/b.txt", "c2", 5), b"world")
        .await;
    assert_eq!(node.blobs.temp_count(), 2);

    assert_eq!(c.commit.discard(ALLOC, "conn-1").unwrap(), 2);
    assert!(c.collector.changes(ALLOC, "conn-1").unwrap().is_empty());
    assert!(matches!(
        c.commit.commit("conn-1", node.marker([1; 32], None, 10)).await,
        Err(CommitError::NoChanges(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_expired_allocation_refuses_writes_and_reads() {
    let node = node();
    let c = &node.container;
    node.declare(&upload("conn-1", "/a.txt", "c1", 5), b"hello")
        .await;
    let root = node.expected_root("conn-1");

    node.clock.set(10_000);

    assert!(matches!(
        c.commit.commit("conn-1", node.marker(root, None, 5)).await,
        Err(CommitError::AllocationExpired(_))
    ));
    assert!(matches!(
        c.query.allocation_details(ALLOC),
        Err(QueryError::AllocationExpired(_))
    ));
    assert!(matches!(
        c.query.allocation_details("nope"),
        Err(QueryError::AllocationNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_runtime_registers_redeems_and_stops() {
    let node = node();
    let runtime = BlobberRuntime::from_container(node.container.clone());

    let outcome = runtime.start().await.unwrap();
    assert!(matches!(outcome, RegistrationOutcome::Submitted { .. }));
    let id = node.container.blobber_id();
    assert!(node.chain.get_blobber(&id).await.unwrap().is_some());

    let root = node.write_file("conn-1", "/a.txt", "c1").await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(
        node.container.query.marker_status(&root).unwrap(),
        MarkerStatus::Committed
    );
    assert!(!node
        .chain
        .submissions_for(functions::BLOBBER_HEALTH_CHECK)
        .is_empty());
    // USD pricing is off by default.
    assert!(node
        .chain
        .submissions_for(functions::UPDATE_BLOBBER_SETTINGS)
        .is_empty());

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_registration_exhaustion_aborts_startup() {
    let node = node();
    node.chain.reject_function(functions::ADD_BLOBBER);
    let runtime = BlobberRuntime::from_container(node.container.clone());

    assert!(runtime.start().await.is_err());
    assert_eq!(
        node.chain.submissions_for(functions::ADD_BLOBBER).len() as u32,
        node.container.config.registration.max_attempts
    );
    runtime.shutdown().await;
}
