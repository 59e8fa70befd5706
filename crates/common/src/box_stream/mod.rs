//! Box stream: authenticated, encrypted framing over a raw byte stream.
//!
//! Every frame is a 34 byte boxed header followed by the body ciphertext.
//! The header carries the body length and the body's MAC. Each direction
//! owns its key and a nonce that advances once for the header and once for
//! the body. A header that decrypts to 18 zero bytes is the goodbye signal.
//!
//! Writes are never fragmented here; callers chunk anything larger than
//! [`MAX_BODY_SIZE`] themselves.

mod frame;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::handshake::BoxStreamKeys;

pub use frame::{FrameHeader, FrameOpener, FrameSealer, HEADER_SIZE, MAX_BODY_SIZE};

/// Any raw, reliable, ordered byte stream a box stream can run over
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased raw stream, as produced by transports
pub type BoxedRawStream = Box<dyn RawStream>;

#[derive(Debug, thiserror::Error)]
pub enum BoxStreamError {
    #[error("box stream frame failed to decrypt")]
    Decrypt,
    #[error("box stream body of {0} bytes exceeds the frame limit")]
    BodyTooLong(usize),
    #[error("box stream is closed")]
    Closed,
    #[error("box stream i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Close state shared by both halves of one stream
#[derive(Debug, Default)]
struct CloseState {
    /// we sent a goodbye (or gave up writing)
    local: AtomicBool,
    /// the remote sent a goodbye, or its frames stopped making sense
    remote: AtomicBool,
}

impl CloseState {
    fn is_closed(&self) -> bool {
        self.local.load(Ordering::Acquire) || self.remote.load(Ordering::Acquire)
    }
}

/// Decrypting half of a box stream
pub struct BoxReader<R> {
    inner: R,
    opener: FrameOpener,
    state: Arc<CloseState>,
}

impl<R: AsyncRead + Unpin> BoxReader<R> {
    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` once the remote has said goodbye. A frame that
    /// fails to authenticate closes the stream and is reported as an error;
    /// nothing further can be read afterwards.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, BoxStreamError> {
        if self.state.remote.load(Ordering::Acquire) {
            return Ok(None);
        }

        match self.recv_frame().await {
            Ok(Some(body)) => Ok(Some(body)),
            Ok(None) => {
                tracing::debug!("box stream received goodbye");
                self.state.remote.store(true, Ordering::Release);
                Ok(None)
            }
            Err(e) => {
                self.state.remote.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, BoxStreamError> {
        let mut header = [0u8; HEADER_SIZE];
        self.inner.read_exact(&mut header).await?;

        match self.opener.open_header(&header)? {
            FrameHeader::Goodbye => Ok(None),
            FrameHeader::Body { len, mac } => {
                let mut body = vec![0u8; len];
                self.inner.read_exact(&mut body).await?;
                self.opener.open_body(&mac, &mut body)?;
                Ok(Some(body))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

/// Encrypting half of a box stream
pub struct BoxWriter<W> {
    inner: W,
    sealer: FrameSealer,
    state: Arc<CloseState>,
}

impl<W: AsyncWrite + Unpin> BoxWriter<W> {
    /// Send `body` as exactly one frame
    pub async fn send(&mut self, body: &[u8]) -> Result<(), BoxStreamError> {
        if self.state.is_closed() {
            return Err(BoxStreamError::Closed);
        }
        let wire = self.sealer.seal(body)?;
        self.inner.write_all(&wire).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Send the goodbye frame and shut the raw stream down.
    ///
    /// Failures here are logged only. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.state.local.swap(true, Ordering::AcqRel) {
            tracing::warn!("box stream already closed");
            return;
        }

        let goodbye = self.sealer.goodbye();
        if let Err(e) = self.inner.write_all(&goodbye).await {
            tracing::debug!("failed to send box stream goodbye: {}", e);
        }
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!("failed to shut down raw stream: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

/// Both halves of a box stream over one raw connection
pub struct BoxStream<S> {
    reader: BoxReader<ReadHalf<S>>,
    writer: BoxWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> BoxStream<S> {
    /// Wrap a raw stream with the keys produced by a handshake
    pub fn new(stream: S, keys: BoxStreamKeys) -> Self {
        let (read, write) = tokio::io::split(stream);
        let state = Arc::new(CloseState::default());
        Self {
            reader: BoxReader {
                inner: read,
                opener: FrameOpener::new(keys.decrypt_key, keys.decrypt_nonce),
                state: state.clone(),
            },
            writer: BoxWriter {
                inner: write,
                sealer: FrameSealer::new(keys.encrypt_key, keys.encrypt_nonce),
                state,
            },
        }
    }

    pub fn split(self) -> (BoxReader<ReadHalf<S>>, BoxWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }

    /// Read the next frame body; a failed frame also closes our side
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>, BoxStreamError> {
        let result = self.reader.recv().await;
        if result.is_err() && !self.writer.state.local.load(Ordering::Acquire) {
            self.writer.close().await;
        }
        result
    }

    pub async fn write(&mut self, body: &[u8]) -> Result<(), BoxStreamError> {
        self.writer.send(body).await
    }

    pub async fn close(&mut self) {
        self.writer.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}
