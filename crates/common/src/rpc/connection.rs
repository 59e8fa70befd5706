use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};

use super::body::Body;
use super::handler::{CallType, HandlerError, Request, RequestBody, RequestHandler, Response};
use super::header::{RpcHeader, HEADER_SIZE};
use super::source::Source;
use super::{RpcConfig, RpcError};
use crate::box_stream::{BoxReader, BoxStream, BoxWriter, BoxedRawStream, MAX_BODY_SIZE};
use crate::ids::FeedId;

/// Largest rpc body accepted from a remote
const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;
/// How long teardown waits for an in-progress write before giving up
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type Reader = BoxReader<ReadHalf<BoxedRawStream>>;
type Writer = BoxWriter<WriteHalf<BoxedRawStream>>;

type ItemSender = mpsc::UnboundedSender<Result<Body, RpcError>>;

/// A call we issued that is waiting on the remote
enum Pending {
    Async(oneshot::Sender<Result<Body, RpcError>>),
    Source(ItemSender),
}

struct Inner {
    remote: FeedId,
    config: RpcConfig,
    handler: Arc<dyn RequestHandler>,
    writer: AsyncMutex<Writer>,
    /// our calls, keyed by the (positive) request number we chose
    pending: Mutex<HashMap<i32, Pending>>,
    /// source calls the remote made to us that are still being pumped,
    ///  each with the signal that stops its pump between messages
    incoming: Mutex<HashMap<i32, watch::Sender<bool>>>,
    next_request: AtomicI32,
    closed: watch::Sender<bool>,
}

/// Multiplexed rpc session over one box stream.
///
/// Cheap to clone; all clones share the same session. A background task
/// owns the read side and routes every inbound message either to one of
/// our pending calls or to the request handler.
#[derive(Clone)]
pub struct RpcConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("remote", &self.inner.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Buffers box stream frames so rpc messages can straddle frame boundaries
struct FrameBuffer {
    reader: Reader,
    buf: BytesMut,
}

impl FrameBuffer {
    async fn read_exact(&mut self, n: usize) -> Result<Option<BytesMut>, RpcError> {
        while self.buf.len() < n {
            match self.reader.recv().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }
        Ok(Some(self.buf.split_to(n)))
    }

    async fn next_message(&mut self) -> Result<Option<(RpcHeader, Body)>, RpcError> {
        let Some(raw) = self.read_exact(HEADER_SIZE).await? else {
            return Ok(None);
        };
        let mut bytes = [0u8; HEADER_SIZE];
        bytes.copy_from_slice(&raw);
        if RpcHeader::is_goodbye(&bytes) {
            return Ok(None);
        }

        let header = RpcHeader::from_bytes(&bytes)?;
        let len = header.body_len as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(RpcError::Framing(format!("body of {} bytes is too large", len)));
        }
        let Some(raw_body) = self.read_exact(len).await? else {
            return Err(RpcError::Framing("stream ended inside a message".to_string()));
        };
        let body = Body::decode(header.body_type, raw_body.to_vec())?;
        Ok(Some((header, body)))
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

fn is_end_marker(body: &Body) -> bool {
    matches!(body, Body::Json(Value::Bool(true)))
}

fn remote_error(body: &Body) -> RpcError {
    match body {
        Body::Json(value) => RpcError::Remote {
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Error")
                .to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        },
        Body::Utf8(text) => RpcError::Remote {
            name: "Error".to_string(),
            message: text.clone(),
        },
        Body::Binary(bytes) => RpcError::Remote {
            name: "Error".to_string(),
            message: format!("{} byte binary error body", bytes.len()),
        },
    }
}

fn request_body(name: &[&str], args: Vec<Value>, kind: CallType) -> Result<Body, RpcError> {
    Body::json(&RequestBody {
        name: name.iter().map(|s| s.to_string()).collect(),
        args,
        kind,
    })
}

impl RpcConnection {
    /// Start an rpc session over an established box stream.
    ///
    /// Must be called inside a tokio runtime; the read loop is spawned
    /// immediately.
    pub fn new(
        stream: BoxStream<BoxedRawStream>,
        remote: FeedId,
        handler: Arc<dyn RequestHandler>,
        config: RpcConfig,
    ) -> Self {
        let (reader, writer) = stream.split();
        let (closed, _) = watch::channel(false);
        let conn = Self {
            inner: Arc::new(Inner {
                remote,
                config,
                handler,
                writer: AsyncMutex::new(writer),
                pending: Mutex::new(HashMap::new()),
                incoming: Mutex::new(HashMap::new()),
                next_request: AtomicI32::new(1),
                closed,
            }),
        };

        let read_loop = conn.clone();
        tokio::spawn(async move {
            read_loop
                .read_loop(FrameBuffer {
                    reader,
                    buf: BytesMut::new(),
                })
                .await
        });
        conn
    }

    pub fn remote_id(&self) -> FeedId {
        self.inner.remote
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the session has ended, for whatever reason
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        wait_closed(&mut rx).await
    }

    /// Take the next request number; numbers start at 1 and never repeat
    fn next_request_number(&self) -> i32 {
        self.inner.next_request.fetch_add(1, Ordering::SeqCst)
    }

    /// Issue a one-shot call and wait for its single response
    pub async fn call_async(&self, name: &[&str], args: Vec<Value>) -> Result<Body, RpcError> {
        let body = request_body(name, args, CallType::Async)?;
        let number = self.next_request_number();
        let (tx, rx) = oneshot::channel();
        self.register(number, Pending::Async(tx))?;

        tracing::trace!(remote = %self.inner.remote, number, method = ?name, "async call");
        if let Err(e) = self.send(false, false, number, &body).await {
            self.inner.pending.lock().remove(&number);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.config.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                self.inner.pending.lock().remove(&number);
                tracing::debug!(remote = %self.inner.remote, number, method = ?name, "async call timed out");
                Err(RpcError::Timeout)
            }
        }
    }

    /// Open a streaming call; items are buffered until pulled from the source
    pub async fn call_source(&self, name: &[&str], args: Vec<Value>) -> Result<Source, RpcError> {
        let body = request_body(name, args, CallType::Source)?;
        let number = self.next_request_number();
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(number, Pending::Source(tx))?;

        tracing::trace!(remote = %self.inner.remote, number, method = ?name, "source call");
        if let Err(e) = self.send(true, false, number, &body).await {
            self.inner.pending.lock().remove(&number);
            return Err(e);
        }
        Ok(Source::new(number, rx, self.clone()))
    }

    fn register(&self, number: i32, pending: Pending) -> Result<(), RpcError> {
        self.inner.pending.lock().insert(number, pending);
        // teardown may have drained the table just before we inserted
        if self.is_closed() {
            self.inner.pending.lock().remove(&number);
            return Err(RpcError::Closed);
        }
        Ok(())
    }

    /// End one of our source calls early and tell the remote
    pub(super) async fn cancel_source(&self, number: i32) {
        let removed = self.inner.pending.lock().remove(&number).is_some();
        if removed && !self.is_closed() {
            if let Err(e) = self.send(true, true, number, &Body::from(true)).await {
                tracing::debug!(number, "failed to send source cancellation: {}", e);
            }
        }
    }

    /// Non-async variant of [`cancel_source`] for use from `Drop`
    pub(super) fn abandon_source(&self, number: i32) {
        let removed = self.inner.pending.lock().remove(&number).is_some();
        if removed && !self.is_closed() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let conn = self.clone();
                handle.spawn(async move {
                    if let Err(e) = conn.send(true, true, number, &Body::from(true)).await {
                        tracing::debug!(number, "failed to send source cancellation: {}", e);
                    }
                });
            }
        }
    }

    /// Write one rpc message: a header frame, then the body in frame sized
    /// chunks. The writer lock keeps messages from interleaving.
    ///
    /// The write runs on its own task, so a message is always written whole
    /// even if the caller stops waiting halfway through.
    async fn send(&self, stream: bool, end: bool, number: i32, body: &Body) -> Result<(), RpcError> {
        let bytes = body.to_bytes()?;
        let header = RpcHeader {
            stream,
            end_or_error: end,
            body_type: body.body_type(),
            body_len: bytes.len() as u32,
            request_number: number,
        };

        let inner = self.inner.clone();
        let write = tokio::spawn(async move {
            let mut writer = inner.writer.lock().await;
            writer.send(&header.to_bytes()).await?;
            for chunk in bytes.chunks(MAX_BODY_SIZE) {
                writer.send(chunk).await?;
            }
            Ok::<(), RpcError>(())
        });
        write
            .await
            .map_err(|e| RpcError::Transport(format!("write task failed: {}", e)))?
    }

    fn spawn_send(&self, stream: bool, end: bool, number: i32, body: Body) {
        let conn = self.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.send(stream, end, number, &body).await {
                tracing::debug!(number, "failed to send rpc message: {}", e);
            }
        });
    }

    /// Close the session: pending calls fail, incoming streams stop and a
    /// goodbye is sent. Safe to call more than once.
    pub async fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        tracing::debug!(remote = %self.inner.remote, "closing rpc connection");
        self.teardown(RpcError::Closed).await;
    }

    async fn teardown(&self, err: RpcError) {
        let pending: Vec<Pending> = self.inner.pending.lock().drain().map(|(_, p)| p).collect();
        for entry in pending {
            match entry {
                Pending::Async(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
                Pending::Source(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }

        let incoming: Vec<watch::Sender<bool>> = self
            .inner
            .incoming
            .lock()
            .drain()
            .map(|(_, stop)| stop)
            .collect();
        for stop in incoming {
            let _ = stop.send(true);
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, self.inner.writer.lock()).await {
            Ok(mut writer) => writer.close().await,
            Err(_) => tracing::warn!(remote = %self.inner.remote, "timed out waiting to send goodbye"),
        }
    }

    async fn read_loop(self, mut frames: FrameBuffer) {
        let mut closed_rx = self.inner.closed.subscribe();
        let result = loop {
            let next = tokio::select! {
                _ = wait_closed(&mut closed_rx) => break Ok(()),
                next = frames.next_message() => next,
            };
            match next {
                Ok(Some((header, body))) => self.dispatch(header, body),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        drop(frames);

        let err = match result {
            Ok(()) => {
                tracing::debug!(remote = %self.inner.remote, "rpc connection ended");
                RpcError::Closed
            }
            Err(e) => {
                tracing::warn!(remote = %self.inner.remote, "rpc connection failed: {}", e);
                e
            }
        };
        if !self.inner.closed.send_replace(true) {
            self.teardown(err).await;
        }
    }

    fn dispatch(&self, header: RpcHeader, body: Body) {
        let number = header.request_number;
        if number > 0 {
            self.on_request(header, body);
        } else if let Some(ours) = number.checked_neg().filter(|n| *n > 0) {
            self.on_response(ours, header, body);
        } else {
            tracing::debug!(remote = %self.inner.remote, number, "ignoring message with invalid request number");
        }
    }

    fn on_response(&self, number: i32, header: RpcHeader, body: Body) {
        let entry = {
            let mut pending = self.inner.pending.lock();
            match pending.get(&number) {
                None => {
                    tracing::trace!(number, "response for unknown request");
                    return;
                }
                Some(Pending::Source(tx)) if !header.end_or_error => {
                    if tx.send(Ok(body)).is_err() {
                        tracing::trace!(number, "source reader dropped");
                    }
                    return;
                }
                Some(_) => pending.remove(&number),
            }
        };

        match entry {
            Some(Pending::Async(tx)) => {
                let result = if header.end_or_error {
                    Err(remote_error(&body))
                } else {
                    Ok(body)
                };
                let _ = tx.send(result);
            }
            Some(Pending::Source(tx)) => {
                if !is_end_marker(&body) {
                    let _ = tx.send(Err(remote_error(&body)));
                }
                drop(tx);
                // answer the remote's end with our own
                self.spawn_send(true, true, number, Body::from(true));
            }
            None => {}
        }
    }

    fn on_request(&self, header: RpcHeader, body: Body) {
        let number = header.request_number;

        if header.end_or_error {
            let stop = self.inner.incoming.lock().remove(&number);
            if let Some(stop) = stop {
                tracing::trace!(number, "remote ended incoming stream");
                let _ = stop.send(true);
                self.spawn_send(true, true, -number, Body::from(true));
            }
            return;
        }

        if header.stream && self.inner.incoming.lock().contains_key(&number) {
            tracing::debug!(number, "ignoring data sent on an incoming source");
            return;
        }

        let parsed: RequestBody = match body.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                let err = HandlerError::InvalidArgs(format!("malformed request: {}", e));
                self.spawn_send(header.stream, true, -number, err.to_body());
                return;
            }
        };

        let request = Request {
            remote: self.inner.remote,
            request_number: number,
            name: parsed.name,
            args: parsed.args,
            kind: parsed.kind,
        };
        tracing::debug!(remote = %self.inner.remote, number, method = %request.method(), "incoming request");

        match request.kind {
            CallType::Async => {
                let conn = self.clone();
                tokio::spawn(async move { conn.answer_async(request).await });
            }
            CallType::Source => {
                let (stop, stop_rx) = watch::channel(false);
                self.inner.incoming.lock().insert(number, stop);
                let conn = self.clone();
                tokio::spawn(async move { conn.pump_source(request, stop_rx).await });
            }
            CallType::Sink | CallType::Duplex => {
                let err = HandlerError::MethodNotFound(format!(
                    "{} ({:?} calls are not supported)",
                    request.method(),
                    request.kind
                ));
                self.spawn_send(true, true, -number, err.to_body());
            }
        }
    }

    async fn answer_async(&self, request: Request) {
        let number = request.request_number;
        let (end, body) = match self.inner.handler.handle(request).await {
            Response::Async(Ok(body)) => (false, body),
            Response::Async(Err(e)) => (true, e.to_body()),
            Response::Source(_) => (
                true,
                HandlerError::Internal("method is a source, not async".to_string()).to_body(),
            ),
        };
        if let Err(e) = self.send(false, end, -number, &body).await {
            tracing::debug!(number, "failed to answer request: {}", e);
        }
    }

    /// Forward a handler's items to the remote until the items run out or
    ///  `stop` fires. The stop signal is only observed between messages.
    async fn pump_source(&self, request: Request, mut stop: watch::Receiver<bool>) {
        let number = request.request_number;
        let response = tokio::select! {
            _ = wait_closed(&mut stop) => return,
            response = self.inner.handler.handle(request) => response,
        };
        let mut items = match response {
            Response::Source(items) => items,
            Response::Async(Ok(body)) => futures::stream::once(async move { Ok(body) }).boxed(),
            Response::Async(Err(e)) => {
                self.finish_incoming(number, e.to_body()).await;
                return;
            }
        };

        loop {
            let item = tokio::select! {
                _ = wait_closed(&mut stop) => {
                    tracing::trace!(number, "incoming source stopped");
                    return;
                }
                item = items.next() => item,
            };
            let Some(item) = item else { break };
            match item {
                Ok(body) => {
                    if let Err(e) = self.send(true, false, -number, &body).await {
                        tracing::debug!(number, "stopped pumping source: {}", e);
                        self.inner.incoming.lock().remove(&number);
                        return;
                    }
                }
                Err(e) => {
                    self.finish_incoming(number, e.to_body()).await;
                    return;
                }
            }
        }
        self.finish_incoming(number, Body::from(true)).await;
    }

    /// Send the end of an incoming source unless the remote already ended it
    async fn finish_incoming(&self, number: i32, body: Body) {
        let owned = self.inner.incoming.lock().remove(&number).is_some();
        if owned {
            if let Err(e) = self.send(true, true, -number, &body).await {
                tracing::debug!(number, "failed to end incoming source: {}", e);
            }
        }
    }
}
