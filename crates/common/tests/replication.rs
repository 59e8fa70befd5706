//! Feed replication between peers

mod common;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::common::address::Address;
use ::common::box_stream::BoxedRawStream;
use ::common::feeds::Feeds;
use ::common::message::Message;
use ::common::peer::{self, FeedsConnection, Listener, PeerBuilder, SyncEnd, SyncError, Transport};
use ::common::rpc::{Body, NoMethods, Request, RequestHandler, Response, RpcConfig, RpcConnection};
use ::common::testkit::{MemoryTransport, TestNetwork, TestPeer};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_follower_replicates_published_message() {
    common::init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("alice").await.unwrap();
    net.add_peer("bob").await.unwrap();

    let alice = net.peer("alice").unwrap();
    let bob = net.peer("bob").unwrap();

    alice
        .publish(json!({"type": "test", "value": 42}))
        .await
        .unwrap();
    bob.follow(alice);

    bob.wait_for_sequence(&alice.id(), 1, WAIT).await.unwrap();

    assert_eq!(bob.last_sequence(&alice.id()).await.unwrap(), 1);
    let stored = bob.peer().feeds().get(&alice.id(), 1).await.unwrap();
    assert_eq!(stored.content().unwrap()["value"], json!(42));
    assert_eq!(stored.author().unwrap(), alice.id());
    assert!(bob.peer().feeds().get(&alice.id(), 2).await.is_err());

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_live_replication_picks_up_later_messages() {
    common::init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("alice").await.unwrap();
    net.add_peer("bob").await.unwrap();
    net.follow_all();

    let alice = net.peer("alice").unwrap();
    let bob = net.peer("bob").unwrap();

    for i in 0..3 {
        alice.publish(json!({"type": "test", "value": i})).await.unwrap();
    }
    bob.wait_for_sequence(&alice.id(), 3, WAIT).await.unwrap();

    bob.publish(json!({"type": "test", "value": "from bob"}))
        .await
        .unwrap();
    alice.wait_for_sequence(&bob.id(), 1, WAIT).await.unwrap();

    alice.publish(json!({"type": "test", "value": 3})).await.unwrap();
    bob.wait_for_sequence(&alice.id(), 4, WAIT).await.unwrap();

    net.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inbound_connection_triggers_sync() {
    common::init_tracing();
    let transport = MemoryTransport::new();
    let mut alice = TestPeer::new("alice", &transport).unwrap();
    let mut bob = TestPeer::new("bob", &transport).unwrap();
    alice.start().await.unwrap();
    bob.start().await.unwrap();

    bob.publish(json!({"type": "test", "value": "hello"}))
        .await
        .unwrap();

    // alice follows bob without knowing where he is
    alice.peer().agent().follow(bob.id());
    // bob dials alice to look for some other feed
    bob.peer()
        .agent()
        .follow(common::feed_id(&common::secret()));
    bob.peer().agent().add_peer(alice.address());

    alice.wait_for_sequence(&bob.id(), 1, WAIT).await.unwrap();

    alice.stop().await.unwrap();
    bob.stop().await.unwrap();
}

/// Memory transport whose dials take a while and are counted
#[derive(Debug)]
struct SlowTransport {
    inner: MemoryTransport,
    delay: Duration,
    dials: AtomicUsize,
}

#[async_trait]
impl Transport for SlowTransport {
    async fn connect(&self, address: &Address) -> io::Result<BoxedRawStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.connect(address).await
    }

    async fn bind(&self, listen: &str) -> io::Result<Box<dyn Listener>> {
        self.inner.bind(listen).await
    }
}

#[tokio::test]
async fn test_followees_on_one_peer_share_a_single_dial() {
    common::init_tracing();
    let memory = MemoryTransport::new();
    let mut alice = TestPeer::new("alice", &memory).unwrap();
    alice.start().await.unwrap();

    let transport = Arc::new(SlowTransport {
        inner: memory.clone(),
        delay: Duration::from_millis(300),
        dials: AtomicUsize::new(0),
    });
    let followees = vec![
        alice.id(),
        common::feed_id(&common::secret()),
        common::feed_id(&common::secret()),
    ];
    let bob = PeerBuilder::new()
        .transport(transport.clone())
        .agent_config(::common::testkit::test_agent_config())
        .follow(followees)
        .peers([alice.address()])
        .build()
        .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let task = tokio::spawn(peer::serve(bob.clone(), None, shutdown_rx));

    // long enough for several agent rounds, shorter than the idle timeout
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(transport.dials.load(Ordering::SeqCst), 1);
    assert_eq!(bob.connections().connections().len(), 1);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
    alice.stop().await.unwrap();
}

/// Serves a fixed list of history items, then optionally stays silent
struct FixedHistory {
    items: Vec<Value>,
    hang: bool,
}

#[async_trait]
impl RequestHandler for FixedHistory {
    async fn handle(&self, _request: Request) -> Response {
        let items = stream::iter(self.items.clone().into_iter().map(|v| Ok(Body::Json(v))));
        if self.hang {
            Response::Source(items.chain(stream::pending()).boxed())
        } else {
            Response::Source(items.boxed())
        }
    }
}

async fn feeds_connection(handler: FixedHistory, idle: Duration) -> (FeedsConnection, Feeds, RpcConnection) {
    let (client, _server) =
        common::rpc_pair(Arc::new(NoMethods), Arc::new(handler), RpcConfig::default()).await;
    let feeds = Feeds::memory();
    let conn = FeedsConnection::new(client.clone(), feeds.clone(), idle, false);
    (conn, feeds, client)
}

fn keyed(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(Message::to_keyed_json).collect()
}

#[tokio::test]
async fn test_sync_stores_verified_messages() {
    let author = common::secret();
    let feed = common::feed_id(&author);
    let messages = common::build_feed(&author, 4);

    let handler = FixedHistory {
        items: keyed(&messages),
        hang: false,
    };
    let (conn, feeds, _) = feeds_connection(handler, Duration::from_secs(5)).await;

    let mut seen = Vec::new();
    let outcome = conn
        .sync_feed(&feed, |message| seen.push(message.sequence().unwrap()))
        .await
        .unwrap();

    assert_eq!(outcome.received, 4);
    assert_eq!(outcome.end, SyncEnd::StreamEnded);
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert_eq!(feeds.last_sequence(&feed).await.unwrap(), 4);
}

#[tokio::test]
async fn test_sync_rejects_hash_mismatch() {
    let author = common::secret();
    let feed = common::feed_id(&author);
    let messages = common::build_feed(&author, 2);

    let mut items = keyed(&messages);
    // claim the key of the other message
    items[0]["key"] = json!(messages[1].key);
    let handler = FixedHistory { items, hang: false };
    let (conn, feeds, _) = feeds_connection(handler, Duration::from_secs(5)).await;

    let err = conn.sync_feed(&feed, |_| {}).await.unwrap_err();
    assert!(matches!(err, SyncError::HashMismatch { sequence: 1 }), "{:?}", err);
    assert_eq!(feeds.last_sequence(&feed).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sync_rejects_sequence_gap() {
    let author = common::secret();
    let feed = common::feed_id(&author);
    let messages = common::build_feed(&author, 3);

    let items = vec![messages[0].to_keyed_json(), messages[2].to_keyed_json()];
    let handler = FixedHistory { items, hang: false };
    let (conn, feeds, _) = feeds_connection(handler, Duration::from_secs(5)).await;

    let err = conn.sync_feed(&feed, |_| {}).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::SequenceGap {
            expected: 2,
            got: 3
        }
    ));
    // the valid prefix is kept
    assert_eq!(feeds.last_sequence(&feed).await.unwrap(), 1);
}

#[tokio::test]
async fn test_sync_resumes_after_stored_messages() {
    let author = common::secret();
    let feed = common::feed_id(&author);
    let messages = common::build_feed(&author, 4);

    let handler = FixedHistory {
        items: keyed(&messages[2..]),
        hang: false,
    };
    let (conn, feeds, _) = feeds_connection(handler, Duration::from_secs(5)).await;
    feeds.store(&feed, 1, &messages[0]).await.unwrap();
    feeds.store(&feed, 2, &messages[1]).await.unwrap();

    let outcome = conn.sync_feed(&feed, |_| {}).await.unwrap();
    assert_eq!(outcome.received, 2);
    assert_eq!(feeds.last_sequence(&feed).await.unwrap(), 4);
}

/// Stores `first` locally when the history request arrives, as if another
///  sync got there first, then serves `items`
struct RacingHistory {
    feeds: Feeds,
    feed: ::common::ids::FeedId,
    first: Message,
    items: Vec<Value>,
}

#[async_trait]
impl RequestHandler for RacingHistory {
    async fn handle(&self, _request: Request) -> Response {
        self.feeds.store(&self.feed, 1, &self.first).await.unwrap();
        let items = self.items.clone().into_iter().map(|v| Ok(Body::Json(v)));
        Response::Source(stream::iter(items).boxed())
    }
}

#[tokio::test]
async fn test_sync_links_onto_the_stored_message_after_duplicate() {
    let author = common::secret();
    let feed = common::feed_id(&author);
    let messages = common::build_feed(&author, 2);
    // a fork of sequence 1 that reached us first
    let fork = Message::create(&author, None, &json!({"type": "fork"}), 1_600_000_000_000).unwrap();

    let feeds = Feeds::memory();
    let handler = RacingHistory {
        feeds: feeds.clone(),
        feed,
        first: fork.clone(),
        items: keyed(&messages),
    };
    let (client, _server) =
        common::rpc_pair(Arc::new(NoMethods), Arc::new(handler), RpcConfig::default()).await;
    let conn = FeedsConnection::new(client, feeds.clone(), Duration::from_secs(5), false);

    let err = conn.sync_feed(&feed, |_| {}).await.unwrap_err();
    assert!(matches!(err, SyncError::BrokenChain { sequence: 2 }), "{:?}", err);
    assert_eq!(feeds.last_sequence(&feed).await.unwrap(), 1);
    assert_eq!(feeds.get(&feed, 1).await.unwrap().key, fork.key);
}

#[tokio::test]
async fn test_silent_peer_hits_idle_timeout() {
    let author = common::secret();
    let feed = common::feed_id(&author);
    let messages = common::build_feed(&author, 1);

    let handler = FixedHistory {
        items: keyed(&messages),
        hang: true,
    };
    let (conn, feeds, client) = feeds_connection(handler, Duration::from_millis(150)).await;

    let outcome = conn.sync_feed(&feed, |_| {}).await.unwrap();
    assert_eq!(outcome.end, SyncEnd::IdleTimeout);
    assert_eq!(outcome.received, 1);
    assert_eq!(feeds.last_sequence(&feed).await.unwrap(), 1);
    assert!(client.is_closed());
}
