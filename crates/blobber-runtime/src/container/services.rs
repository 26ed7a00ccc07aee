//! # Service Container
//!
//! Holds every subsystem instance and the ports they share.
//!
//! ## Initialization Order
//!
//! ```text
//! Level 0: key-value store, blob store, chain ports, time (injected)
//! Level 1: allocation repository, reference tree store, change collector
//! Level 2: change processor + cleanup worker, write-marker ledger
//! Level 3: redemption scheduler, commit handler, query handler
//! ```
//!
//! Nothing here spawns tasks; `BlobberRuntime::start` does that.

use std::sync::Arc;

use bl_02_reference_tree::TreeStore;
use bl_03_allocation_changes::{
    cleanup_channel, BlobStore, ChangeCollector, ChangeProcessor, CleanupWorker,
};
use bl_04_write_marker_ledger::WriteMarkerLedger;
use bl_05_redemption_scheduler::RedemptionScheduler;
use parking_lot::Mutex;
use shared_types::{AllocationRepository, KeyValueStore, NodeIdentity, TimeSource};
use tracing::info;

use crate::container::config::NodeConfig;
use crate::handlers::{CommitHandler, StorageQueryHandler};
use crate::workers::{ChainHandles, NodeProfile};

pub struct ServiceContainer {
    // =========================================================================
    // LEVEL 0: Injected ports
    // =========================================================================
    pub store: Arc<dyn KeyValueStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub chain: ChainHandles,
    pub time: Arc<dyn TimeSource>,

    // =========================================================================
    // LEVEL 1-2: Write path
    // =========================================================================
    pub allocations: AllocationRepository,
    pub trees: Arc<TreeStore>,
    pub collector: Arc<ChangeCollector>,
    pub processor: Arc<ChangeProcessor>,
    pub ledger: Arc<WriteMarkerLedger>,

    // =========================================================================
    // LEVEL 3: Entry points
    // =========================================================================
    pub scheduler: Arc<RedemptionScheduler>,
    pub commit: CommitHandler,
    pub query: StorageQueryHandler,

    /// Node configuration (immutable after initialization).
    pub config: NodeConfig,
    pub identity: NodeIdentity,

    /// Taken once by the runtime when it spawns the worker.
    cleanup_worker: Mutex<Option<CleanupWorker>>,
}

impl ServiceContainer {
    pub fn new(
        config: NodeConfig,
        identity: NodeIdentity,
        store: Arc<dyn KeyValueStore>,
        blobs: Arc<dyn BlobStore>,
        chain: ChainHandles,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let blobber_id = identity.id();
        info!("[runtime] Wiring services for blobber {}", blobber_id);

        let strategy = config.hash_strategy.build();
        let allocations = AllocationRepository::new(Arc::clone(&store));
        let trees = Arc::new(TreeStore::new(
            Arc::clone(&store),
            strategy,
            Arc::clone(&time),
        ));
        let collector = Arc::new(ChangeCollector::new(Arc::clone(&store)));
        info!("[runtime]   tree store and change collector ready ({:?})", config.hash_strategy);

        let (cleanup, cleanup_worker) = cleanup_channel(Arc::clone(&blobs));
        let processor = Arc::new(ChangeProcessor::new(Arc::clone(&time), cleanup));
        let ledger = Arc::new(WriteMarkerLedger::new(Arc::clone(&store), Arc::clone(&time)));
        info!("[runtime]   change processor and write-marker ledger ready");

        let scheduler = Arc::new(RedemptionScheduler::new(
            ledger.clone(),
            Arc::clone(&chain.gateway),
            config.writemarker_redeem.clone(),
        ));
        let commit = CommitHandler::new(
            blobber_id,
            allocations.clone(),
            Arc::clone(&trees),
            Arc::clone(&collector),
            Arc::clone(&processor),
            ledger.clone(),
            Arc::clone(&blobs),
            Arc::clone(&time),
        );
        let query = StorageQueryHandler::new(
            allocations.clone(),
            Arc::clone(&trees),
            Arc::clone(&ledger),
            Arc::clone(&time),
        );
        info!(
            "[runtime]   redemption scheduler ready ({} workers, every {}s)",
            config.writemarker_redeem.num_workers, config.writemarker_redeem.frequency_secs
        );

        Self {
            store,
            blobs,
            chain,
            time,
            allocations,
            trees,
            collector,
            processor,
            ledger,
            scheduler,
            commit,
            query,
            config,
            identity,
            cleanup_worker: Mutex::new(Some(cleanup_worker)),
        }
    }

    pub fn blobber_id(&self) -> String {
        self.identity.id()
    }

    /// What this node advertises on chain.
    pub fn profile(&self) -> NodeProfile {
        NodeProfile::new(self.blobber_id(), self.config.blobber.clone())
    }

    /// `None` once the runtime has taken it.
    pub fn take_cleanup_worker(&self) -> Option<CleanupWorker> {
        self.cleanup_worker.lock().take()
    }
}
