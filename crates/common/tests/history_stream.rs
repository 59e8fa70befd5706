//! `createHistoryStream` as served by the peer request handler

mod common;

use std::sync::Arc;
use std::time::Duration;

use ::common::blobs::MemoryBlobsStorage;
use ::common::feeds::Feeds;
use ::common::message::Message;
use ::common::peer::PeerRequestHandler;
use ::common::rpc::{NoMethods, RpcConfig, RpcConnection};
use serde_json::{json, Value};

struct Served {
    client: RpcConnection,
    feeds: Feeds,
    author: ::common::crypto::SecretKey,
    messages: Vec<Message>,
}

async fn serve_feed(n: usize) -> Served {
    let author = common::secret();
    let feed = common::feed_id(&author);
    let feeds = Feeds::memory();
    let messages = common::build_feed(&author, n);
    for (i, message) in messages.iter().enumerate() {
        feeds.store(&feed, i as u64 + 1, message).await.unwrap();
    }

    let handler = PeerRequestHandler::new(
        common::feed_id(&common::secret()),
        feeds.clone(),
        Arc::new(MemoryBlobsStorage::new()),
    );
    let (client, _server) =
        common::rpc_pair(Arc::new(NoMethods), Arc::new(handler), RpcConfig::default()).await;

    Served {
        client,
        feeds,
        author,
        messages,
    }
}

async fn collect(client: &RpcConnection, options: Value) -> Vec<Value> {
    let mut source = client
        .call_source(&["createHistoryStream"], vec![options])
        .await
        .unwrap();
    let mut items = Vec::new();
    while let Some(item) = source.read().await {
        items.push(item.unwrap().as_json().cloned().unwrap());
    }
    items
}

#[tokio::test]
async fn test_replays_whole_feed_in_order() {
    let served = serve_feed(5).await;
    let feed = common::feed_id(&served.author);

    let items = collect(&served.client, json!({"id": feed})).await;
    assert_eq!(items.len(), 5);
    for (i, item) in items.iter().enumerate() {
        assert_eq!(item["key"], json!(served.messages[i].key));
        assert_eq!(item["value"]["sequence"], json!(i + 1));
    }
}

#[tokio::test]
async fn test_starts_at_requested_sequence() {
    let served = serve_feed(5).await;
    let feed = common::feed_id(&served.author);

    let items = collect(&served.client, json!({"id": feed, "sequence": 3})).await;
    let sequences: Vec<u64> = items
        .iter()
        .map(|item| item["value"]["sequence"].as_u64().unwrap())
        .collect();
    assert_eq!(sequences, vec![3, 4, 5]);

    // older clients say `seq`
    let items = collect(&served.client, json!({"id": feed, "seq": 5})).await;
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn test_limit_and_bare_values() {
    let served = serve_feed(5).await;
    let feed = common::feed_id(&served.author);

    let items = collect(
        &served.client,
        json!({"id": feed, "limit": 2, "keys": false}),
    )
    .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], served.messages[0].value);
    assert!(items[0].get("key").is_none());
}

#[tokio::test]
async fn test_unknown_feed_is_empty() {
    let served = serve_feed(1).await;
    let stranger = common::feed_id(&common::secret());
    assert!(collect(&served.client, json!({"id": stranger})).await.is_empty());
}

#[tokio::test]
async fn test_live_stream_forwards_new_messages() {
    let served = serve_feed(2).await;
    let feed = common::feed_id(&served.author);

    let mut source = served
        .client
        .call_source(
            &["createHistoryStream"],
            vec![json!({"id": feed, "live": true})],
        )
        .await
        .unwrap();
    for expected in 1..=2u64 {
        let item = source.read().await.unwrap().unwrap();
        assert_eq!(item.as_json().unwrap()["value"]["sequence"], json!(expected));
    }

    let published = served
        .feeds
        .publish(&served.author, json!({"type": "test", "value": "live"}))
        .await
        .unwrap();
    assert_eq!(published.sequence().unwrap(), 3);

    let item = tokio::time::timeout(Duration::from_secs(1), source.read())
        .await
        .expect("live message never arrived")
        .unwrap()
        .unwrap();
    assert_eq!(item.as_json().unwrap()["key"], json!(published.key));

    source.cancel().await;
}

#[tokio::test]
async fn test_whoami_and_bad_arguments() {
    let served = serve_feed(0).await;

    let body = served.client.call_async(&["whoami"], vec![]).await.unwrap();
    assert!(body.as_json().unwrap()["id"].as_str().unwrap().starts_with('@'));

    let mut source = served
        .client
        .call_source(&["createHistoryStream"], vec![json!({"nope": 1})])
        .await
        .unwrap();
    assert!(source.read().await.unwrap().is_err());
}
