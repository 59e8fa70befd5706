use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::DuplexStream;

use crate::address::Address;
use crate::box_stream::BoxedRawStream;
use crate::peer::{Listener, Transport};

/// Bytes buffered in each direction of an in-memory pipe
const PIPE_CAPACITY: usize = 64 * 1024;

type Registry = Arc<Mutex<HashMap<String, flume::Sender<DuplexStream>>>>;

/// In-process transport: `bind("host:port")` registers a listener under
///  that name and `connect` hands it one end of a tokio duplex pipe.
///  Clones share the same registry, so every peer of a test should use a
///  clone of one transport.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    listeners: Registry,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryListener {
    name: String,
    registry: Registry,
    incoming: flume::Receiver<DuplexStream>,
    accepted: u64,
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.name);
    }
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> io::Result<(BoxedRawStream, String)> {
        let stream = self
            .incoming
            .recv_async()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "listener unregistered"))?;
        self.accepted += 1;
        Ok((Box::new(stream), format!("memory#{}", self.accepted)))
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.name.clone())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, address: &Address) -> io::Result<BoxedRawStream> {
        let name = address.socket_addr();
        let sender = self.listeners.lock().get(&name).cloned();
        let refused = || io::Error::new(io::ErrorKind::ConnectionRefused, name.clone());

        let sender = sender.ok_or_else(refused)?;
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        sender.send_async(remote).await.map_err(|_| refused())?;
        Ok(Box::new(local))
    }

    async fn bind(&self, listen: &str) -> io::Result<Box<dyn Listener>> {
        let (tx, rx) = flume::unbounded();
        {
            let mut listeners = self.listeners.lock();
            if listeners.contains_key(listen) {
                return Err(io::Error::new(io::ErrorKind::AddrInUse, listen.to_string()));
            }
            listeners.insert(listen.to_string(), tx);
        }
        tracing::debug!("memory listener bound to {}", listen);
        Ok(Box::new(MemoryListener {
            name: listen.to_string(),
            registry: self.listeners.clone(),
            incoming: rx,
            accepted: 0,
        }))
    }
}
