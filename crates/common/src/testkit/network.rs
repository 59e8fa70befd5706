use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::peer::TestPeer;
use super::transport::MemoryTransport;

/// A set of named test peers sharing one memory transport
#[derive(Default)]
pub struct TestNetwork {
    transport: MemoryTransport,
    peers: HashMap<String, TestPeer>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> &MemoryTransport {
        &self.transport
    }

    /// Add a new peer to the network and start it
    pub async fn add_peer(&mut self, name: impl Into<String>) -> Result<&TestPeer> {
        let name = name.into();
        if self.peers.contains_key(&name) {
            return Err(anyhow!("peer '{}' already exists", name));
        }

        let mut peer = TestPeer::new(name.clone(), &self.transport)?;
        peer.start().await?;
        Ok(self.peers.entry(name).or_insert(peer))
    }

    pub fn peer(&self, name: &str) -> Option<&TestPeer> {
        self.peers.get(name)
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Make every peer follow, and know the address of, every other peer
    pub fn follow_all(&self) {
        for (name, peer) in &self.peers {
            for (other_name, other) in &self.peers {
                if name != other_name {
                    peer.follow(other);
                }
            }
        }
        tracing::info!("{} peers follow each other", self.peers.len());
    }

    /// Stop every peer
    pub async fn shutdown(&mut self) -> Result<()> {
        for (name, mut peer) in self.peers.drain() {
            tracing::debug!("stopping peer {}", name);
            peer.stop().await?;
        }
        Ok(())
    }
}
