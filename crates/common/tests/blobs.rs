//! Blob transfer between peers

mod common;

use std::sync::Arc;

use ::common::blobs::{BlobsStorage, BlobsStorageError, MemoryBlobsStorage};
use ::common::feeds::Feeds;
use ::common::ids::BlobId;
use ::common::peer::{fetch_blob, FetchBlobError, PeerRequestHandler};
use ::common::rpc::{Body, NoMethods, Request, RequestHandler, Response, RpcConfig, RpcError};
use ::common::testkit::TestNetwork;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;

async fn serving(blobs: Arc<MemoryBlobsStorage>) -> ::common::rpc::RpcConnection {
    let handler = PeerRequestHandler::new(
        common::feed_id(&common::secret()),
        Feeds::memory(),
        blobs,
    );
    let (client, _server) =
        common::rpc_pair(Arc::new(NoMethods), Arc::new(handler), RpcConfig::default()).await;
    client
}

#[tokio::test]
async fn test_fetch_blob_spanning_many_chunks() {
    let remote = Arc::new(MemoryBlobsStorage::new());
    let content: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();
    let id = remote.store_blob(&content).await.unwrap();
    let client = serving(remote).await;

    let has = client
        .call_async(&["blobs", "has"], vec![json!(id)])
        .await
        .unwrap();
    assert_eq!(has.as_json(), Some(&json!(true)));

    let local = MemoryBlobsStorage::new();
    fetch_blob(&client, &id, &local).await.unwrap();
    assert_eq!(local.get_blob(&id).await.unwrap(), content);
}

#[tokio::test]
async fn test_missing_blob_is_an_error() {
    let client = serving(Arc::new(MemoryBlobsStorage::new())).await;
    let id = BlobId::of(b"never stored");

    let has = client
        .call_async(&["blobs", "has"], vec![json!({"key": id})])
        .await
        .unwrap();
    assert_eq!(has.as_json(), Some(&json!(false)));

    let local = MemoryBlobsStorage::new();
    let err = fetch_blob(&client, &id, &local).await.unwrap_err();
    assert!(matches!(err, FetchBlobError::Rpc(RpcError::Remote { .. })), "{:?}", err);
    assert!(!local.has_blob(&id).await.unwrap());
}

/// Answers every blob request with the wrong bytes
struct LyingBlobs;

#[async_trait]
impl RequestHandler for LyingBlobs {
    async fn handle(&self, _request: Request) -> Response {
        Response::Source(stream::iter(vec![Ok(Body::Binary(b"not it".to_vec()))]).boxed())
    }
}

#[tokio::test]
async fn test_fetched_blob_must_match_its_id() {
    let (client, _server) =
        common::rpc_pair(Arc::new(NoMethods), Arc::new(LyingBlobs), RpcConfig::default()).await;
    let id = BlobId::of(b"the real thing");

    let local = MemoryBlobsStorage::new();
    let err = fetch_blob(&client, &id, &local).await.unwrap_err();
    assert!(matches!(
        err,
        FetchBlobError::Storage(BlobsStorageError::HashMismatch(_))
    ));
    assert!(!local.has_blob(&id).await.unwrap());
}

#[tokio::test]
async fn test_peer_fetches_blob_by_address() {
    let mut net = TestNetwork::new();
    net.add_peer("alice").await.unwrap();
    net.add_peer("bob").await.unwrap();
    let alice = net.peer("alice").unwrap();
    let bob = net.peer("bob").unwrap();

    let id = alice.put_blob(b"a picture of a fish").await.unwrap();
    assert!(!bob.has_blob(&id).await.unwrap());

    bob.peer().fetch_blob(&alice.address(), &id).await.unwrap();
    assert!(bob.has_blob(&id).await.unwrap());

    net.shutdown().await.unwrap();
}
