//! # Bootstrap
//!
//! Turns a validated `NodeConfig` into the injected ports of the service
//! container. Every error here is fatal: the node never starts half-wired.
//!
//! The metadata store may live on a volume that is still being mounted when
//! the process starts, so opening it is retried for a bounded window
//! (`storage.open_retries` x `storage.open_retry_interval_ms`).

use std::path::Path;
use std::sync::Arc;

use bl_01_chain_gateway::{GatewayError, JsonRpcGateway, SimulatedLedger, TransactionBuilder};
use bl_03_allocation_changes::{BlobStore, InMemoryBlobStore};
use shared_types::{
    FileBackedKVStore, HashStrategy, IdentityError, InMemoryKVStore, KVStoreError, KeyValueStore,
    NodeIdentity, TimeSource,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::FsBlobStore;
use crate::container::config::{ChainConfig, ChainMode, ConfigError, StorageBackend, StorageConfig};
use crate::workers::ChainHandles;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot read keys file {path}: {error}")]
    KeysFile { path: String, error: String },

    #[error("Invalid keys in {path}: {error}")]
    Identity { path: String, error: IdentityError },

    #[error("Store unavailable after {attempts} attempts: {error}")]
    StoreUnavailable { attempts: u32, error: KVStoreError },

    #[error("Storage backend {0} is not compiled in")]
    BackendUnavailable(&'static str),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Read the node's key pair. A missing or malformed file is fatal.
pub fn load_identity(path: &Path) -> Result<NodeIdentity, BootstrapError> {
    let display = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|e| BootstrapError::KeysFile {
        path: display.clone(),
        error: e.to_string(),
    })?;
    let identity = NodeIdentity::from_keys_file(&contents).map_err(|error| {
        BootstrapError::Identity {
            path: display,
            error,
        }
    })?;
    info!("[runtime] Loaded node identity {}", identity.id());
    Ok(identity)
}

fn open_once(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>, KVStoreError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryKVStore::new())),
        StorageBackend::File => {
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| KVStoreError::Unavailable {
                    message: format!("cannot create {}: {}", parent.display(), e),
                })?;
            }
            Ok(Arc::new(FileBackedKVStore::open(&config.path)?))
        }
        #[cfg(feature = "rocksdb")]
        StorageBackend::Rocksdb => {
            use crate::adapters::storage::{RocksDbConfig, RocksDbStore};
            let path = config.path.to_string_lossy().to_string();
            Ok(Arc::new(RocksDbStore::open(RocksDbConfig::at(path))?))
        }
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::Rocksdb => Err(KVStoreError::Unavailable {
            message: "rocksdb".into(),
        }),
    }
}

/// Open the metadata store, retrying within the configured window.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>, BootstrapError> {
    if cfg!(not(feature = "rocksdb")) && config.backend == StorageBackend::Rocksdb {
        return Err(BootstrapError::BackendUnavailable("rocksdb"));
    }

    let attempts = config.open_retries.max(1);
    let mut attempt = 1;
    loop {
        match open_once(config) {
            Ok(store) => {
                info!(
                    "[runtime] Opened {:?} store at {}",
                    config.backend,
                    config.path.display()
                );
                return Ok(store);
            }
            Err(error) if attempt >= attempts => {
                return Err(BootstrapError::StoreUnavailable { attempts, error });
            }
            Err(e) => {
                warn!(
                    "[runtime] Store open attempt {}/{} failed: {}",
                    attempt, attempts, e
                );
                attempt += 1;
                tokio::time::sleep(config.open_retry_interval()).await;
            }
        }
    }
}

/// Blob content on disk under `storage.blob_dir`, or in memory when unset.
pub fn build_blob_store(config: &StorageConfig) -> Arc<dyn BlobStore> {
    if config.blob_dir.as_os_str().is_empty() {
        warn!("[runtime] storage.blob_dir is empty, blob content is kept in memory");
        Arc::new(InMemoryBlobStore::new())
    } else {
        Arc::new(FsBlobStore::new(&config.blob_dir))
    }
}

/// Chain ports for the configured mode.
pub fn build_chain(
    config: &ChainConfig,
    identity: &NodeIdentity,
    strategy: Arc<dyn HashStrategy>,
    time: Arc<dyn TimeSource>,
) -> Result<ChainHandles, BootstrapError> {
    let confirmation = config.gateway.confirmation.clone();
    match config.mode {
        ChainMode::Simulated => {
            warn!("[runtime] Using the in-process simulated chain");
            Ok(ChainHandles::simulated(
                Arc::new(SimulatedLedger::new()),
                confirmation,
            ))
        }
        ChainMode::JsonRpc => {
            let builder = TransactionBuilder::new(identity.clone(), strategy, time);
            let gateway = Arc::new(JsonRpcGateway::new(&config.gateway, builder)?);
            Ok(ChainHandles {
                gateway: gateway.clone(),
                reader: gateway.clone(),
                prices: gateway,
                confirmation,
            })
        }
    }
}
