use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::transport::MemoryTransport;
use crate::address::Address;
use crate::crypto::SecretKey;
use crate::ids::{BlobId, FeedId};
use crate::message::Message;
use crate::peer::{AgentConfig, Peer, PeerBuilder, Transport};

/// Port every test peer listens on; the peer name is the host
pub const TEST_PORT: u16 = 8008;

/// Agent settings with windows short enough for tests
pub fn test_agent_config() -> AgentConfig {
    AgentConfig {
        idle_timeout: Duration::from_secs(2),
        throttle: Duration::from_millis(10),
        ..AgentConfig::default()
    }
}

/// A peer on a [`MemoryTransport`] with convenience methods for
///  integration testing
pub struct TestPeer {
    /// The name of this peer, also its host on the memory transport
    pub name: String,
    peer: Peer,
    transport: MemoryTransport,
    shutdown_tx: Option<watch::Sender<()>>,
    peer_task: Option<JoinHandle<Result<()>>>,
}

impl TestPeer {
    /// Create a peer with memory storages and a fresh identity
    pub fn new(name: impl Into<String>, transport: &MemoryTransport) -> Result<Self> {
        Self::with_config(name, transport, test_agent_config())
    }

    pub fn with_config(
        name: impl Into<String>,
        transport: &MemoryTransport,
        config: AgentConfig,
    ) -> Result<Self> {
        let name = name.into();
        let peer = PeerBuilder::new()
            .secret_key(SecretKey::generate()?)
            .listen(format!("{}:{}", name, TEST_PORT))
            .transport(Arc::new(transport.clone()))
            .agent_config(config)
            .build()?;

        Ok(Self {
            name,
            peer,
            transport: transport.clone(),
            shutdown_tx: None,
            peer_task: None,
        })
    }

    /// Bind the listener, then run the peer in the background
    pub async fn start(&mut self) -> Result<()> {
        if self.peer_task.is_some() {
            return Err(anyhow!("peer {} already started", self.name));
        }

        let listen = self
            .peer
            .listen_address()
            .ok_or_else(|| anyhow!("peer {} has no listen address", self.name))?;
        let listener = self.transport.bind(listen).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let peer = self.peer.clone();
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            tracing::debug!("[{}] starting peer", name);
            crate::peer::serve(peer, Some(listener), shutdown_rx).await?;
            tracing::debug!("[{}] peer stopped", name);
            Ok(())
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.peer_task = Some(handle);
        tracing::info!("[{}] peer started with id {}", self.name, self.id());
        Ok(())
    }

    /// Signal shutdown and wait for the peer task
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(handle) = self.peer_task.take() {
            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.send(());
            }
            handle.await??;
            tracing::info!("[{}] peer stopped", self.name);
        }
        Ok(())
    }

    pub fn id(&self) -> FeedId {
        self.peer.id()
    }

    /// Where other test peers reach this one
    pub fn address(&self) -> Address {
        Address::net(self.name.clone(), TEST_PORT, self.id())
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub async fn publish(&self, content: Value) -> Result<Message> {
        Ok(self.peer.publish(content).await?)
    }

    /// Follow `other`'s feed and add it as a peer
    pub fn follow(&self, other: &TestPeer) {
        self.peer.agent().follow(other.id());
        self.peer.agent().add_peer(other.address());
    }

    pub async fn put_blob(&self, content: &[u8]) -> Result<BlobId> {
        Ok(self.peer.blobs().store_blob(content).await?)
    }

    pub async fn has_blob(&self, id: &BlobId) -> Result<bool> {
        Ok(self.peer.blobs().has_blob(id).await?)
    }

    pub async fn last_sequence(&self, feed: &FeedId) -> Result<u64> {
        Ok(self.peer.feeds().last_sequence(feed).await?)
    }

    /// Poll until `feed` reaches `sequence` locally
    pub async fn wait_for_sequence(
        &self,
        feed: &FeedId,
        sequence: u64,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let last = self.last_sequence(feed).await?;
            if last >= sequence {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!(
                    "[{}] feed {} stuck at {} waiting for {}",
                    self.name,
                    feed,
                    last,
                    sequence
                ));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }
    }
}
