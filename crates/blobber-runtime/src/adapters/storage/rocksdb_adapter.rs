//! # RocksDB Storage Adapter
//!
//! [`KeyValueStore`] over a single RocksDB instance.
//!
//! - Atomic batches via `WriteBatch`
//! - Snappy compression, 10-bit bloom filters, LRU block cache
//! - fsync on write unless disabled for tests
//!
//! Guarded writes take the write lock, read the condition keys, and then
//! write the batch before releasing it. Every other writer also takes the
//! write lock, so no write can land between the check and the batch.

use std::sync::Arc;

use parking_lot::RwLock;
use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use shared_types::{BatchOperation, Condition, KVStoreError, KeyValueStore};

/// RocksDB tuning.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory
    pub path: String,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 32MB)
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    /// fsync after each write (default: true)
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "./data/blobber.db".to_string(),
            block_cache_size: 64 * 1024 * 1024,
            write_buffer_size: 32 * 1024 * 1024,
            max_write_buffer_number: 3,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small buffers, no fsync.
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            sync_writes: false,
        }
    }
}

fn io_error(op: &str, e: rocksdb::Error) -> KVStoreError {
    KVStoreError::IOError {
        message: format!("RocksDB {} failed: {}", op, e),
    }
}

pub struct RocksDbStore {
    db: Arc<RwLock<DB>>,
    config: RocksDbConfig,
}

impl RocksDbStore {
    /// Open or create the database at `config.path`.
    pub fn open(config: RocksDbConfig) -> Result<Self, KVStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compression_type(DBCompressionType::Snappy);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, &config.path).map_err(|e| KVStoreError::Unavailable {
            message: format!("Failed to open RocksDB at {}: {}", config.path, e),
        })?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            config,
        })
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn write_batch(&self, db: &DB, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        let mut batch = WriteBatch::default();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => batch.put(&key, &value),
                BatchOperation::Delete { key } => batch.delete(&key),
            }
        }
        db.write_opt(batch, &self.write_options())
            .map_err(|e| io_error("batch write", e))
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.db.read().get(key).map_err(|e| io_error("get", e))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        let db = self.db.write();
        db.put_opt(key, value, &self.write_options())
            .map_err(|e| io_error("put", e))
    }

    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
        let db = self.db.write();
        db.delete_opt(key, &self.write_options())
            .map_err(|e| io_error("delete", e))
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        let db = self.db.write();
        self.write_batch(&db, operations)
    }

    fn compare_and_write(
        &self,
        conditions: &[Condition],
        operations: Vec<BatchOperation>,
    ) -> Result<(), KVStoreError> {
        let db = self.db.write();
        for condition in conditions {
            let current = db.get(&condition.key).map_err(|e| io_error("get", e))?;
            if current != condition.expected {
                return Err(KVStoreError::ConditionFailed {
                    key: String::from_utf8_lossy(&condition.key).into_owned(),
                });
            }
        }
        self.write_batch(&db, operations)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        self.db
            .read()
            .get_pinned(key)
            .map(|v| v.is_some())
            .map_err(|e| io_error("exists check", e))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let db = self.db.read();
        let mut results = Vec::new();
        for item in db.iterator(IteratorMode::From(prefix, rocksdb::Direction::Forward)) {
            let (key, value) = item.map_err(|e| io_error("scan", e))?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> RocksDbStore {
        RocksDbStore::open(RocksDbConfig::for_testing(
            dir.path().to_string_lossy().to_string(),
        ))
        .unwrap()
    }

    #[test]
    fn test_rocksdb_basic_operations() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.put(b"key1", b"value1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert!(store.exists(b"key1").unwrap());

        store.delete(b"key1").unwrap();
        assert!(!store.exists(b"key1").unwrap());
    }

    #[test]
    fn test_rocksdb_prefix_scan_is_ordered_and_bounded() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"wm:a:0002".to_vec(), b"2".to_vec()),
                BatchOperation::put(b"wm:a:0001".to_vec(), b"1".to_vec()),
                BatchOperation::put(b"wm:b:0001".to_vec(), b"x".to_vec()),
            ])
            .unwrap();

        let keys: Vec<_> = store
            .prefix_scan(b"wm:a:")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"wm:a:0001".to_vec(), b"wm:a:0002".to_vec()]);
    }

    #[test]
    fn test_rocksdb_guarded_write() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store
            .compare_and_write(
                &[Condition::absent(b"root".to_vec())],
                vec![BatchOperation::put(b"root".to_vec(), b"r1".to_vec())],
            )
            .unwrap();

        // Stale expectation: nothing written.
        let err = store
            .compare_and_write(
                &[Condition::absent(b"root".to_vec())],
                vec![BatchOperation::put(b"other".to_vec(), b"x".to_vec())],
            )
            .unwrap_err();
        assert!(matches!(err, KVStoreError::ConditionFailed { .. }));
        assert!(!store.exists(b"other").unwrap());

        store
            .compare_and_write(
                &[Condition::equals(b"root".to_vec(), b"r1".to_vec())],
                vec![BatchOperation::put(b"root".to_vec(), b"r2".to_vec())],
            )
            .unwrap();
        assert_eq!(store.get(b"root").unwrap(), Some(b"r2".to_vec()));
    }

    #[test]
    fn test_rocksdb_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        open(&dir).put(b"k", b"v").unwrap();
        assert_eq!(open(&dir).get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
