use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{BlobsStorage, BlobsStorageError};
use crate::ids::BlobId;

/// Blobs stored as files named by the hex digest of their content
#[derive(Debug, Clone)]
pub struct FsBlobsStorage {
    root: PathBuf,
}

impl FsBlobsStorage {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, BlobsStorageError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path(&self, id: &BlobId) -> PathBuf {
        self.root.join(id.to_hex())
    }
}

#[async_trait]
impl BlobsStorage for FsBlobsStorage {
    async fn has_blob(&self, id: &BlobId) -> Result<bool, BlobsStorageError> {
        Ok(tokio::fs::try_exists(self.path(id)).await?)
    }

    async fn store_blob(&self, content: &[u8]) -> Result<BlobId, BlobsStorageError> {
        let id = BlobId::of(content);
        let path = self.path(&id);
        if tokio::fs::try_exists(&path).await? {
            return Ok(id);
        }

        // write under a temporary name so readers never see a partial blob
        let tmp = self.root.join(format!(".{}.tmp", id.to_hex()));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(blob = %id, size = content.len(), "stored blob");
        Ok(id)
    }

    async fn get_blob(&self, id: &BlobId) -> Result<Vec<u8>, BlobsStorageError> {
        match tokio::fs::read(self.path(id)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobsStorageError::NotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_get_has() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsBlobsStorage::new(dir.path()).await.unwrap();

        let id = storage.store_blob(b"hello blobs").await.unwrap();
        assert_eq!(id, BlobId::of(b"hello blobs"));
        assert!(storage.has_blob(&id).await.unwrap());
        assert_eq!(storage.get_blob(&id).await.unwrap(), b"hello blobs");

        // idempotent
        assert_eq!(storage.store_blob(b"hello blobs").await.unwrap(), id);

        let missing = BlobId::of(b"nope");
        assert!(!storage.has_blob(&missing).await.unwrap());
        assert!(matches!(
            storage.get_blob(&missing).await,
            Err(BlobsStorageError::NotFound(_))
        ));
    }
}
