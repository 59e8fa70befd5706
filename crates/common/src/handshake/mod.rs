//! Secret handshake (SHS) mutual authentication.
//!
//! Four messages are exchanged over a raw byte stream before anything else:
//!
//! 1. client hello:  `auth(network, a_pub) || a_pub`                (64 bytes)
//! 2. server hello:  `auth(network, b_pub) || b_pub`                (64 bytes)
//! 3. client auth:   `box(sig_A || A)` keyed by `sha256(K||ab||aB)` (112 bytes)
//! 4. server accept: `box(sig_B)` keyed by `sha256(K||ab||aB||Ab)`  (80 bytes)
//!
//! Any verification failure aborts the attempt and shuts the stream down.
//! Nothing is retried here; callers decide whether to reconnect.

mod state;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{KeyError, PublicKey, SecretKey};
use crate::network_key::NetworkKey;

pub use state::{
    ephemeral, BoxStreamKeys, ClientHandshake, ServerHandshake, SessionKeys, CLIENT_AUTH_SIZE,
    HELLO_SIZE, SERVER_ACCEPT_SIZE,
};

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("hello failed network key authentication")]
    InvalidHello,
    #[error("client authentication failed")]
    InvalidClientAuth,
    #[error("server accept failed verification")]
    InvalidServerAccept,
    #[error("diffie-hellman produced a low order point")]
    WeakKey,
    #[error("handshake step out of order: {0}")]
    OutOfOrder(&'static str),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("failed to generate ephemeral key: {0}")]
    Rng(String),
    #[error("handshake i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandshakeError {
    /// Whether the failure came from the remote failing to prove an identity
    /// or network membership, as opposed to transport trouble
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            HandshakeError::InvalidHello
                | HandshakeError::InvalidClientAuth
                | HandshakeError::InvalidServerAccept
                | HandshakeError::WeakKey
        )
    }
}

/// Result of a completed handshake
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// The authenticated long-term identity of the other side
    pub remote: PublicKey,
    /// Keys for this side's box stream
    pub keys: BoxStreamKeys,
}

async fn read_array<S, const N: usize>(stream: &mut S) -> Result<[u8; N], std::io::Error>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; N];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn abort<S, T>(stream: &mut S, err: HandshakeError) -> Result<T, HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    tracing::debug!("aborting handshake: {}", err);
    if let Err(e) = stream.shutdown().await {
        tracing::trace!("failed to shut down stream after handshake failure: {}", e);
    }
    Err(err)
}

/// Run the initiating side of the handshake against `server`
pub async fn client<S>(
    stream: &mut S,
    network: &NetworkKey,
    local: &SecretKey,
    server: &PublicKey,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match client_inner(stream, network, local, server).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => abort(stream, e).await,
    }
}

async fn client_inner<S>(
    stream: &mut S,
    network: &NetworkKey,
    local: &SecretKey,
    server: &PublicKey,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = ClientHandshake::new(*network, local.clone(), *server, ephemeral()?);

    stream.write_all(&state.hello()).await?;
    stream.flush().await?;

    let server_hello = read_array::<_, HELLO_SIZE>(stream).await?;
    state.read_server_hello(&server_hello)?;

    stream.write_all(&state.client_auth()).await?;
    stream.flush().await?;

    let accept = read_array::<_, SERVER_ACCEPT_SIZE>(stream).await?;
    let (remote, keys) = state.read_server_accept(&accept)?;

    tracing::debug!(remote = %remote.to_base64(), "client handshake complete");
    Ok(HandshakeOutcome {
        remote,
        keys: keys.for_client(),
    })
}

/// Run the accepting side of the handshake; the client's identity is learned
pub async fn server<S>(
    stream: &mut S,
    network: &NetworkKey,
    local: &SecretKey,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match server_inner(stream, network, local).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => abort(stream, e).await,
    }
}

async fn server_inner<S>(
    stream: &mut S,
    network: &NetworkKey,
    local: &SecretKey,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = ServerHandshake::new(*network, local.clone(), ephemeral()?);

    // nothing is written until the client proves it knows the network key
    let client_hello = read_array::<_, HELLO_SIZE>(stream).await?;
    state.read_client_hello(&client_hello)?;

    stream.write_all(&state.hello()).await?;
    stream.flush().await?;

    let client_auth = read_array::<_, CLIENT_AUTH_SIZE>(stream).await?;
    state.read_client_auth(&client_auth)?;

    let (accept, remote, keys) = state.server_accept()?;
    stream.write_all(&accept).await?;
    stream.flush().await?;

    tracing::debug!(remote = %remote.to_base64(), "server handshake complete");
    Ok(HandshakeOutcome {
        remote,
        keys: keys.for_server(),
    })
}
