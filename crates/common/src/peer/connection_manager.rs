//! One logical rpc connection per remote identity.
//!
//! Entries may go stale when a connection closes on its own; every lookup
//! revalidates with `is_closed` before handing a connection out. Dials
//! through [`ConnectionManager::get_connection_with`] are serialized per
//! remote key, so concurrent callers share one connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::watch::Receiver as WatchReceiver;

use super::transport::{Listener, Transport};
use crate::address::Address;
use crate::box_stream::{BoxStream, BoxedRawStream};
use crate::crypto::SecretKey;
use crate::handshake::{self, HandshakeError};
use crate::ids::FeedId;
use crate::network_key::NetworkKey;
use crate::rpc::{RequestHandler, RpcConfig, RpcConnection};

/// Upper bound on the four handshake messages
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("handshake timed out")]
    Timeout,
}

struct ManagerInner {
    secret: SecretKey,
    network: NetworkKey,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn RequestHandler>,
    rpc_config: RpcConfig,
    connections: Mutex<HashMap<FeedId, RpcConnection>>,
    /// held while a dial to that key is in flight
    dialing: Mutex<HashMap<FeedId, Arc<AsyncMutex<()>>>>,
    outgoing: broadcast::Sender<RpcConnection>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.inner.transport)
            .field("connections", &self.inner.connections.lock().len())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        secret: SecretKey,
        network: NetworkKey,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn RequestHandler>,
        rpc_config: RpcConfig,
    ) -> Self {
        let (outgoing, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                secret,
                network,
                transport,
                handler,
                rpc_config,
                connections: Mutex::new(HashMap::new()),
                dialing: Mutex::new(HashMap::new()),
                outgoing,
            }),
        }
    }

    /// The live connection to `address.key`, connecting if there is none
    pub async fn get_connection_with(
        &self,
        address: &Address,
    ) -> Result<RpcConnection, ConnectError> {
        if let Some(conn) = self.get(&address.key) {
            return Ok(conn);
        }

        let gate = self
            .inner
            .dialing
            .lock()
            .entry(address.key)
            .or_default()
            .clone();
        let _dialing = gate.lock().await;

        // whoever held the gate before us may have connected already
        if let Some(conn) = self.get(&address.key) {
            tracing::trace!(peer = %address.key, "reusing connection dialed concurrently");
            return Ok(conn);
        }
        self.connect(address).await
    }

    /// Live connection to `peer`, if one is open
    pub fn get(&self, peer: &FeedId) -> Option<RpcConnection> {
        let mut connections = self.inner.connections.lock();
        match connections.get(peer) {
            Some(conn) if !conn.is_closed() => Some(conn.clone()),
            Some(_) => {
                connections.remove(peer);
                None
            }
            None => None,
        }
    }

    /// Always open a fresh connection, then announce it to subscribers
    pub async fn connect(&self, address: &Address) -> Result<RpcConnection, ConnectError> {
        tracing::debug!(peer = %address.key, "connecting to {}", address);
        let mut stream = self.inner.transport.connect(address).await?;

        let outcome = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            handshake::client(
                &mut stream,
                &self.inner.network,
                &self.inner.secret,
                address.key.public_key(),
            ),
        )
        .await
        .map_err(|_| ConnectError::Timeout)??;

        let conn = self.register(stream, outcome);
        tracing::info!(peer = %conn.remote_id(), "connected to {}", address);
        // nobody listening is fine
        let _ = self.inner.outgoing.send(conn.clone());
        Ok(conn)
    }

    /// Run the server side of the handshake over an accepted stream
    pub async fn accept(&self, mut stream: BoxedRawStream) -> Result<RpcConnection, ConnectError> {
        let outcome = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            handshake::server(&mut stream, &self.inner.network, &self.inner.secret),
        )
        .await
        .map_err(|_| ConnectError::Timeout)??;
        let conn = self.register(stream, outcome);
        tracing::info!(peer = %conn.remote_id(), "accepted connection");
        Ok(conn)
    }

    fn register(&self, stream: BoxedRawStream, outcome: handshake::HandshakeOutcome) -> RpcConnection {
        let remote = FeedId::from(outcome.remote);
        let conn = RpcConnection::new(
            BoxStream::new(stream, outcome.keys),
            remote,
            self.inner.handler.clone(),
            self.inner.rpc_config.clone(),
        );

        let mut connections = self.inner.connections.lock();
        connections.retain(|_, existing| !existing.is_closed());
        connections.insert(remote, conn.clone());
        conn
    }

    /// Accept inbound connections until shutdown, yielding each one that
    /// completes the handshake. Failed handshakes are logged and skipped.
    pub fn listen(
        &self,
        mut listener: Box<dyn Listener>,
        mut shutdown_rx: WatchReceiver<()>,
    ) -> flume::Receiver<RpcConnection> {
        let (tx, rx) = flume::unbounded();
        let manager = self.clone();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => accepted,
                };

                let (stream, remote) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("failed to accept connection: {}", e);
                        continue;
                    }
                };

                let manager = manager.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    match manager.accept(stream).await {
                        Ok(conn) => {
                            if tx.send_async(conn).await.is_err() {
                                tracing::debug!("inbound connection dropped, nobody is listening");
                            }
                        }
                        Err(e) => tracing::warn!("inbound handshake from {} failed: {}", remote, e),
                    }
                });
            }
            tracing::debug!("stopped accepting connections");
        });

        rx
    }

    /// Connections opened through [`connect`](Self::connect) from now on
    pub fn subscribe_outgoing(&self) -> broadcast::Receiver<RpcConnection> {
        self.inner.outgoing.subscribe()
    }

    /// Currently open connections
    pub fn connections(&self) -> Vec<RpcConnection> {
        self.inner
            .connections
            .lock()
            .values()
            .filter(|conn| !conn.is_closed())
            .cloned()
            .collect()
    }

    /// Close every tracked connection
    pub async fn reset(&self) {
        let connections: Vec<RpcConnection> = self
            .inner
            .connections
            .lock()
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        tracing::debug!("closing {} connections", connections.len());
        futures::future::join_all(connections.iter().map(|conn| conn.close())).await;
    }
}
