//! Shared helpers for the protocol integration tests
#![allow(dead_code)]

use std::sync::Arc;

use ::common::box_stream::{BoxStream, BoxedRawStream};
use ::common::crypto::SecretKey;
use ::common::handshake::{self, HandshakeOutcome};
use ::common::ids::FeedId;
use ::common::message::Message;
use ::common::network_key::NetworkKey;
use ::common::rpc::{RequestHandler, RpcConfig, RpcConnection};
use serde_json::json;
use tokio::io::DuplexStream;

pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Log to the test output when RUST_LOG is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn secret() -> SecretKey {
    SecretKey::generate().unwrap()
}

pub fn feed_id(secret: &SecretKey) -> FeedId {
    FeedId::from(secret.public())
}

/// Both ends of a completed handshake over an in-memory pipe
pub struct HandshakePair {
    pub client_secret: SecretKey,
    pub server_secret: SecretKey,
    pub client: (DuplexStream, HandshakeOutcome),
    pub server: (DuplexStream, HandshakeOutcome),
}

pub async fn handshake_pair() -> HandshakePair {
    handshake_pair_over(PIPE_CAPACITY).await
}

/// Like [`handshake_pair`], over a pipe that buffers at most `capacity` bytes
pub async fn handshake_pair_over(capacity: usize) -> HandshakePair {
    let network = NetworkKey::default();
    let client_secret = secret();
    let server_secret = secret();
    let (mut client_io, mut server_io) = tokio::io::duplex(capacity);
    let server_public = server_secret.public();

    let (client, server) = tokio::join!(
        handshake::client(
            &mut client_io,
            &network,
            &client_secret,
            &server_public
        ),
        handshake::server(&mut server_io, &network, &server_secret),
    );

    HandshakePair {
        client_secret,
        server_secret,
        client: (client_io, client.unwrap()),
        server: (server_io, server.unwrap()),
    }
}

/// Box streams for both ends of a fresh handshake
pub async fn box_stream_pair() -> (BoxStream<BoxedRawStream>, BoxStream<BoxedRawStream>) {
    let pair = handshake_pair().await;
    let (client_io, client) = pair.client;
    let (server_io, server) = pair.server;
    (
        BoxStream::new(Box::new(client_io) as BoxedRawStream, client.keys),
        BoxStream::new(Box::new(server_io) as BoxedRawStream, server.keys),
    )
}

/// Rpc connections for both ends of a fresh handshake; `client_handler`
/// answers requests made by the server and vice versa
pub async fn rpc_pair(
    client_handler: Arc<dyn RequestHandler>,
    server_handler: Arc<dyn RequestHandler>,
    config: RpcConfig,
) -> (RpcConnection, RpcConnection) {
    rpc_pair_over(PIPE_CAPACITY, client_handler, server_handler, config).await
}

pub async fn rpc_pair_over(
    capacity: usize,
    client_handler: Arc<dyn RequestHandler>,
    server_handler: Arc<dyn RequestHandler>,
    config: RpcConfig,
) -> (RpcConnection, RpcConnection) {
    let pair = handshake_pair_over(capacity).await;
    let (client_io, client) = pair.client;
    let (server_io, server) = pair.server;

    let client_conn = RpcConnection::new(
        BoxStream::new(Box::new(client_io) as BoxedRawStream, client.keys),
        FeedId::from(client.remote),
        client_handler,
        config.clone(),
    );
    let server_conn = RpcConnection::new(
        BoxStream::new(Box::new(server_io) as BoxedRawStream, server.keys),
        FeedId::from(server.remote),
        server_handler,
        config,
    );
    (client_conn, server_conn)
}

/// A correctly chained feed of `n` test messages
pub fn build_feed(secret: &SecretKey, n: usize) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    for i in 0..n {
        let content = json!({"type": "test", "value": i});
        let message =
            Message::create(secret, messages.last(), &content, 1_700_000_000_000 + i as i64)
                .unwrap();
        messages.push(message);
    }
    messages
}
