//! Content-addressed blob storage.

mod fs;
mod memory;

use std::fmt::Debug;

use async_trait::async_trait;

use crate::ids::BlobId;

pub use fs::FsBlobsStorage;
pub use memory::MemoryBlobsStorage;

#[derive(thiserror::Error, Debug)]
pub enum BlobsStorageError {
    #[error("blob not found: {0}")]
    NotFound(BlobId),
    #[error("blob content does not hash to {0}")]
    HashMismatch(BlobId),
    #[error("blobs storage i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where blobs live. Ids are always the SHA-256 of the content.
#[async_trait]
pub trait BlobsStorage: Send + Sync + Debug + 'static {
    async fn has_blob(&self, id: &BlobId) -> Result<bool, BlobsStorageError>;

    /// Store `content`, returning the id it hashes to. Storing the same
    /// content twice is harmless.
    async fn store_blob(&self, content: &[u8]) -> Result<BlobId, BlobsStorageError>;

    async fn get_blob(&self, id: &BlobId) -> Result<Vec<u8>, BlobsStorageError>;
}
