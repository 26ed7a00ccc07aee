//! In-memory blob store for tests and development.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::BlobError;
use crate::ports::{BlobFile, BlobStore};

type TempKey = (String, String, String);
type ContentKey = (String, String);

#[derive(Default)]
struct Inner {
    temp: HashMap<TempKey, Vec<u8>>,
    content: HashMap<ContentKey, Vec<u8>>,
}

/// Blob store backed by two hash maps.
#[derive(Default)]
pub struct InMemoryBlobStore {
    inner: Mutex<Inner>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temp_count(&self) -> usize {
        self.inner.lock().temp.len()
    }

    pub fn content_count(&self) -> usize {
        self.inner.lock().content.len()
    }

    pub fn content(&self, allocation_id: &str, content_hash: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .content
            .get(&(allocation_id.to_string(), content_hash.to_string()))
            .cloned()
    }
}

fn temp_key(allocation_id: &str, file: &BlobFile, connection_id: &str) -> TempKey {
    (
        allocation_id.to_string(),
        connection_id.to_string(),
        file.path.clone(),
    )
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn write_temp(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
        data: &[u8],
    ) -> Result<(), BlobError> {
        self.inner
            .lock()
            .temp
            .insert(temp_key(allocation_id, file, connection_id), data.to_vec());
        Ok(())
    }

    async fn commit_write(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
    ) -> Result<(), BlobError> {
        let mut inner = self.inner.lock();
        let data = inner
            .temp
            .remove(&temp_key(allocation_id, file, connection_id))
            .ok_or_else(|| BlobError::TempNotFound {
                path: file.path.clone(),
                connection_id: connection_id.to_string(),
            })?;
        inner.content.insert(
            (allocation_id.to_string(), file.content_hash.clone()),
            data,
        );
        Ok(())
    }

    async fn delete_temp_file(
        &self,
        allocation_id: &str,
        file: &BlobFile,
        connection_id: &str,
    ) -> Result<(), BlobError> {
        self.inner
            .lock()
            .temp
            .remove(&temp_key(allocation_id, file, connection_id));
        Ok(())
    }

    async fn delete_content(&self, allocation_id: &str, content_hash: &str) -> Result<(), BlobError> {
        self.inner
            .lock()
            .content
            .remove(&(allocation_id.to_string(), content_hash.to_string()));
        Ok(())
    }

    async fn has_content(&self, allocation_id: &str, content_hash: &str) -> Result<bool, BlobError> {
        Ok(self
            .inner
            .lock()
            .content
            .contains_key(&(allocation_id.to_string(), content_hash.to_string())))
    }
}
