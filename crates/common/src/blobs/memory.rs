use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{BlobsStorage, BlobsStorageError};
use crate::ids::BlobId;

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobsStorage {
    inner: Arc<RwLock<HashMap<BlobId, Vec<u8>>>>,
}

impl MemoryBlobsStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobsStorage for MemoryBlobsStorage {
    async fn has_blob(&self, id: &BlobId) -> Result<bool, BlobsStorageError> {
        Ok(self.inner.read().contains_key(id))
    }

    async fn store_blob(&self, content: &[u8]) -> Result<BlobId, BlobsStorageError> {
        let id = BlobId::of(content);
        self.inner
            .write()
            .entry(id)
            .or_insert_with(|| content.to_vec());
        Ok(id)
    }

    async fn get_blob(&self, id: &BlobId) -> Result<Vec<u8>, BlobsStorageError> {
        self.inner
            .read()
            .get(id)
            .cloned()
            .ok_or(BlobsStorageError::NotFound(*id))
    }
}
