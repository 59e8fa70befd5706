use serde_json::Value;

use crate::blobs::{BlobsStorage, BlobsStorageError};
use crate::ids::BlobId;
use crate::rpc::{Body, RpcConnection, RpcError};

/// Refuse blobs larger than this when fetching
pub const MAX_BLOB_SIZE: usize = 5 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum FetchBlobError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("storage error: {0}")]
    Storage(#[from] BlobsStorageError),
    #[error("remote sent a non-binary chunk")]
    UnexpectedBody,
    #[error("blob exceeds {MAX_BLOB_SIZE} bytes")]
    TooLarge,
}

/// Download `id` from the remote end of `conn`, check it hashes to `id`,
/// and store it
pub async fn fetch_blob(
    conn: &RpcConnection,
    id: &BlobId,
    storage: &dyn BlobsStorage,
) -> Result<(), FetchBlobError> {
    if storage.has_blob(id).await? {
        return Ok(());
    }

    let mut source = conn
        .call_source(&["blobs", "get"], vec![Value::String(id.to_string())])
        .await?;

    let mut content = Vec::new();
    while let Some(item) = source.read().await {
        match item? {
            Body::Binary(chunk) => content.extend_from_slice(&chunk),
            _ => return Err(FetchBlobError::UnexpectedBody),
        }
        if content.len() > MAX_BLOB_SIZE {
            return Err(FetchBlobError::TooLarge);
        }
    }

    if BlobId::of(&content) != *id {
        return Err(BlobsStorageError::HashMismatch(*id).into());
    }
    storage.store_blob(&content).await?;
    tracing::debug!(blob = %id, peer = %conn.remote_id(), "fetched blob");
    Ok(())
}
