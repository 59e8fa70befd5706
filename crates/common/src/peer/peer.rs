use std::sync::Arc;

use serde_json::Value;

use super::agent::{AgentConfig, FeedsAgent};
use super::blobs::{fetch_blob, FetchBlobError};
use super::connection_manager::{ConnectError, ConnectionManager};
use super::handler::PeerRequestHandler;
use super::transport::{TcpTransport, Transport};
use crate::address::Address;
use crate::blobs::{BlobsStorage, MemoryBlobsStorage};
use crate::crypto::{KeyError, SecretKey};
use crate::feeds::{Feeds, FeedsStorage, PublishError};
use crate::ids::{BlobId, FeedId};
use crate::message::Message;
use crate::network_key::NetworkKey;
use crate::rpc::RpcConfig;

#[derive(Default)]
pub struct PeerBuilder {
    /// `host:port` to accept connections on
    ///  if not set, the peer only dials out
    listen: Option<String>,
    /// the identity of the peer
    ///  generated if not set
    secret_key: Option<SecretKey>,
    network_key: Option<NetworkKey>,
    transport: Option<Arc<dyn Transport>>,
    feeds_storage: Option<Arc<dyn FeedsStorage>>,
    blobs_storage: Option<Arc<dyn BlobsStorage>>,
    rpc_config: RpcConfig,
    agent_config: AgentConfig,
    peers: Vec<Address>,
    follow: Vec<FeedId>,
}

impl PeerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = Some(listen.into());
        self
    }

    pub fn secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    pub fn network_key(mut self, network_key: NetworkKey) -> Self {
        self.network_key = Some(network_key);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn feeds_storage(mut self, storage: Arc<dyn FeedsStorage>) -> Self {
        self.feeds_storage = Some(storage);
        self
    }

    pub fn blobs_storage(mut self, storage: Arc<dyn BlobsStorage>) -> Self {
        self.blobs_storage = Some(storage);
        self
    }

    pub fn rpc_config(mut self, config: RpcConfig) -> Self {
        self.rpc_config = config;
        self
    }

    pub fn agent_config(mut self, config: AgentConfig) -> Self {
        self.agent_config = config;
        self
    }

    /// Initial peers handed to the agent
    pub fn peers(mut self, peers: impl IntoIterator<Item = Address>) -> Self {
        self.peers.extend(peers);
        self
    }

    /// Initial follow list handed to the agent
    pub fn follow(mut self, feeds: impl IntoIterator<Item = FeedId>) -> Self {
        self.follow.extend(feeds);
        self
    }

    pub fn build(self) -> Result<Peer, KeyError> {
        let secret_key = match self.secret_key {
            Some(secret_key) => secret_key,
            None => SecretKey::generate()?,
        };
        let id = FeedId::from(secret_key.public());
        let network_key = self.network_key.unwrap_or_default();
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport) as Arc<dyn Transport>);

        // storages default to memory
        let feeds = match self.feeds_storage {
            Some(storage) => Feeds::new(storage),
            None => Feeds::memory(),
        };
        let blobs = self
            .blobs_storage
            .unwrap_or_else(|| Arc::new(MemoryBlobsStorage::new()) as Arc<dyn BlobsStorage>);

        let handler = Arc::new(PeerRequestHandler::new(id, feeds.clone(), blobs.clone()));
        let connections = ConnectionManager::new(
            secret_key.clone(),
            network_key,
            transport.clone(),
            handler,
            self.rpc_config,
        );
        let agent = FeedsAgent::new(id, feeds.clone(), connections.clone(), self.agent_config);
        for feed in self.follow {
            agent.follow(feed);
        }
        for address in self.peers {
            agent.add_peer(address);
        }

        tracing::debug!(id = %id, listen = ?self.listen, "built peer");
        Ok(Peer {
            id,
            listen: self.listen,
            secret_key,
            network_key,
            transport,
            feeds,
            blobs,
            connections,
            agent,
        })
    }
}

/// Everything one Scuttlebutt identity needs to replicate: keys, storages,
///  the connection manager and the feeds agent. Cloning shares all state.
#[derive(Clone)]
pub struct Peer {
    id: FeedId,
    listen: Option<String>,
    secret_key: SecretKey,
    network_key: NetworkKey,
    transport: Arc<dyn Transport>,
    feeds: Feeds,
    blobs: Arc<dyn BlobsStorage>,
    connections: ConnectionManager,
    agent: FeedsAgent,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("listen", &self.listen)
            .field("transport", &self.transport)
            .finish()
    }
}

impl Peer {
    pub fn id(&self) -> FeedId {
        self.id
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn network_key(&self) -> &NetworkKey {
        &self.network_key
    }

    pub fn listen_address(&self) -> Option<&str> {
        self.listen.as_deref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn feeds(&self) -> &Feeds {
        &self.feeds
    }

    pub fn blobs(&self) -> &Arc<dyn BlobsStorage> {
        &self.blobs
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn agent(&self) -> &FeedsAgent {
        &self.agent
    }

    /// Append `content` to our own feed
    pub async fn publish(&self, content: Value) -> Result<Message, PublishError> {
        self.feeds.publish(&self.secret_key, content).await
    }

    /// Fetch a blob from the peer at `address` into our blob storage
    pub async fn fetch_blob(&self, address: &Address, id: &BlobId) -> Result<(), PeerFetchError> {
        let conn = self.connections.get_connection_with(address).await?;
        fetch_blob(&conn, id, self.blobs.as_ref()).await?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PeerFetchError {
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchBlobError),
}
