//! # Persistence Port
//!
//! The key-value interface every subsystem persists through, plus the two
//! in-process adapters.
//!
//! Production: `RocksDbStore` (blobber-runtime/adapters/storage/rocksdb_adapter.rs)
//! Development: [`FileBackedKVStore`]
//! Testing: [`InMemoryKVStore`]
//!
//! ## Guarded writes
//!
//! [`KeyValueStore::compare_and_write`] applies a batch only if every
//! [`Condition`] holds at the moment of the write. The check and the write
//! happen under the same lock, so two writers racing on the same key cannot
//! both succeed.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::KVStoreError;

/// Abstract interface for key-value database operations.
///
/// All methods take `&self`; adapters serialize writers internally so a
/// single `Arc<dyn KeyValueStore>` can be shared across tasks.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key.
    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Execute an atomic batch write.
    ///
    /// Either ALL operations in the batch are applied, or NONE are.
    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Execute an atomic batch write only if every condition holds.
    ///
    /// Returns [`KVStoreError::ConditionFailed`] naming the first key whose
    /// current value differs from the expectation; nothing is written then.
    fn compare_and_write(
        &self,
        conditions: &[Condition],
        operations: Vec<BatchOperation>,
    ) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError>;

    /// All pairs whose key starts with `prefix`, in ascending key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }

    /// Key touched by this operation.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOperation::Put { key, .. } | BatchOperation::Delete { key } => key,
        }
    }
}

/// Expected state of one key at write time. `expected: None` means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub key: Vec<u8>,
    pub expected: Option<Vec<u8>>,
}

impl Condition {
    /// The key must currently hold exactly `value`.
    pub fn equals(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            expected: Some(value.into()),
        }
    }

    /// The key must currently be absent.
    pub fn absent(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            expected: None,
        }
    }

    /// The key must hold `value` if given, or be absent otherwise.
    pub fn matches(key: impl Into<Vec<u8>>, value: Option<&[u8]>) -> Self {
        Self {
            key: key.into(),
            expected: value.map(|v| v.to_vec()),
        }
    }

    fn check(&self, data: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), KVStoreError> {
        if data.get(&self.key) == self.expected.as_ref() {
            Ok(())
        } else {
            Err(KVStoreError::ConditionFailed {
                key: String::from_utf8_lossy(&self.key).into_owned(),
            })
        }
    }
}

/// Encode a record with bincode.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, KVStoreError> {
    bincode::serialize(value).map_err(|e| KVStoreError::Serialization {
        message: e.to_string(),
    })
}

/// Decode a bincode record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, KVStoreError> {
    bincode::deserialize(bytes).map_err(|e| KVStoreError::CorruptionError {
        message: e.to_string(),
    })
}

fn apply(data: &mut BTreeMap<Vec<u8>, Vec<u8>>, operations: Vec<BatchOperation>) {
    for op in operations {
        match op {
            BatchOperation::Put { key, value } => {
                data.insert(key, value);
            }
            BatchOperation::Delete { key } => {
                data.remove(&key);
            }
        }
    }
}

fn scan(data: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    data.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// In-memory key-value store for unit tests.
#[derive(Default)]
pub struct InMemoryKVStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Copy of the whole keyspace, for before/after comparisons in tests.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.data.read().clone()
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        apply(&mut self.data.write(), operations);
        Ok(())
    }

    fn compare_and_write(
        &self,
        conditions: &[Condition],
        operations: Vec<BatchOperation>,
    ) -> Result<(), KVStoreError> {
        let mut data = self.data.write();
        for condition in conditions {
            condition.check(&data)?;
        }
        apply(&mut data, operations);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.data.read().contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(scan(&self.data.read(), prefix))
    }
}

/// File-backed key-value store for nodes running without RocksDB.
///
/// The whole keyspace is kept in memory and rewritten to disk after every
/// write, via a temp file and rename, so a crash leaves either the old or the
/// new image. Suitable for development and small deployments.
pub struct FileBackedKVStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    path: PathBuf,
}

impl FileBackedKVStore {
    /// Open the store at `path`, creating it empty if the file is missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KVStoreError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let data = Self::load_from_file(&path)?;
            tracing::info!(
                "[shared] Loaded {} keys from {}",
                data.len(),
                path.display()
            );
            data
        } else {
            tracing::info!("[shared] No existing storage file at {}", path.display());
            BTreeMap::new()
        };

        Ok(Self {
            data: RwLock::new(data),
            path,
        })
    }

    fn load_from_file(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, KVStoreError> {
        let mut bytes = Vec::new();
        std::fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| KVStoreError::IOError {
                message: e.to_string(),
            })?;

        // Format: [key_len:u32][key][value_len:u32][value]...
        let mut data = BTreeMap::new();
        let mut cursor = 0;
        while cursor < bytes.len() {
            let key = Self::read_chunk(&bytes, &mut cursor)?;
            let value = Self::read_chunk(&bytes, &mut cursor)?;
            data.insert(key, value);
        }
        Ok(data)
    }

    fn read_chunk(bytes: &[u8], cursor: &mut usize) -> Result<Vec<u8>, KVStoreError> {
        let truncated = || KVStoreError::CorruptionError {
            message: format!("truncated storage file at offset {}", cursor),
        };
        let len_bytes: [u8; 4] = bytes
            .get(*cursor..*cursor + 4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(truncated)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let start = *cursor + 4;
        let chunk = bytes.get(start..start + len).ok_or_else(truncated)?.to_vec();
        *cursor = start + len;
        Ok(chunk)
    }

    fn save_to_file(&self, data: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), KVStoreError> {
        let io = |e: std::io::Error| KVStoreError::IOError {
            message: e.to_string(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }

        let mut bytes = Vec::new();
        for (key, value) in data {
            bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
            bytes.extend_from_slice(key);
            bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
            bytes.extend_from_slice(value);
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).map_err(io)?;
        file.write_all(&bytes).map_err(io)?;
        file.sync_all().map_err(io)?;
        std::fs::rename(&temp_path, &self.path).map_err(io)
    }

    /// Apply `operations` to a copy, persist it, then publish it.
    fn write_through(
        &self,
        data: &mut BTreeMap<Vec<u8>, Vec<u8>>,
        operations: Vec<BatchOperation>,
    ) -> Result<(), KVStoreError> {
        let mut next = data.clone();
        apply(&mut next, operations);
        self.save_to_file(&next)?;
        *data = next;
        Ok(())
    }
}

impl KeyValueStore for FileBackedKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.atomic_batch_write(vec![BatchOperation::put(key, value)])
    }

    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
        self.atomic_batch_write(vec![BatchOperation::delete(key)])
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        let mut data = self.data.write();
        self.write_through(&mut data, operations)
    }

    fn compare_and_write(
        &self,
        conditions: &[Condition],
        operations: Vec<BatchOperation>,
    ) -> Result<(), KVStoreError> {
        let mut data = self.data.write();
        for condition in conditions {
            condition.check(&data)?;
        }
        self.write_through(&mut data, operations)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.data.read().contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(scan(&self.data.read(), prefix))
    }
}
