use std::fmt::Debug;
use std::io;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::address::Address;
use crate::box_stream::BoxedRawStream;

/// Source of inbound raw connections
#[async_trait]
pub trait Listener: Send + 'static {
    /// Wait for the next connection; the string describes the remote end
    async fn accept(&mut self) -> io::Result<(BoxedRawStream, String)>;

    /// Where this listener can be reached, as `host:port`
    fn local_addr(&self) -> io::Result<String>;
}

/// Carrier for raw byte streams below the handshake
#[async_trait]
pub trait Transport: Send + Sync + Debug + 'static {
    async fn connect(&self, address: &Address) -> io::Result<BoxedRawStream>;

    /// Start listening on `host:port`
    async fn bind(&self, listen: &str) -> io::Result<Box<dyn Listener>>;
}

/// Plain TCP
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

struct TcpStreamListener(TcpListener);

#[async_trait]
impl Listener for TcpStreamListener {
    async fn accept(&mut self) -> io::Result<(BoxedRawStream, String)> {
        let (stream, remote) = self.0.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), remote.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        self.0.local_addr().map(|addr| addr.to_string())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &Address) -> io::Result<BoxedRawStream> {
        let stream = TcpStream::connect(address.socket_addr()).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    async fn bind(&self, listen: &str) -> io::Result<Box<dyn Listener>> {
        let listener = TcpListener::bind(listen).await?;
        tracing::info!("listening for peers on {}", listener.local_addr()?);
        Ok(Box::new(TcpStreamListener(listener)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::ids::FeedId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_connect_and_accept() {
        let transport = TcpTransport;
        let mut listener = transport.bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let port: u16 = local.rsplit(':').next().unwrap().parse().unwrap();

        let key = FeedId::from(SecretKey::generate().unwrap().public());
        let address = Address::net("127.0.0.1", port, key);

        let (client, server) = tokio::join!(transport.connect(&address), listener.accept());
        let mut client = client.unwrap();
        let (mut server, _) = server.unwrap();

        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }
}
