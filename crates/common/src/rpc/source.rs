use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::body::Body;
use super::connection::RpcConnection;
use super::RpcError;

/// Pull side of a source call we issued.
///
/// Items that arrive before they are read are buffered. The stream ends
/// when the remote sends its end frame; an error item is always last.
/// Dropping an unfinished source tells the remote to stop.
pub struct Source {
    number: i32,
    rx: mpsc::UnboundedReceiver<Result<Body, RpcError>>,
    conn: RpcConnection,
    finished: bool,
}

impl Source {
    pub(super) fn new(
        number: i32,
        rx: mpsc::UnboundedReceiver<Result<Body, RpcError>>,
        conn: RpcConnection,
    ) -> Self {
        Self {
            number,
            rx,
            conn,
            finished: false,
        }
    }

    pub fn request_number(&self) -> i32 {
        self.number
    }

    /// Next item, or `None` once the stream has ended
    pub async fn read(&mut self) -> Option<Result<Body, RpcError>> {
        if self.finished {
            return None;
        }
        let item = self.rx.recv().await;
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }

    /// Stop the stream and wait until the remote has been told
    pub async fn cancel(mut self) {
        if !self.finished {
            self.finished = true;
            self.conn.cancel_source(self.number).await;
        }
    }
}

impl Stream for Source {
    type Item = Result<Body, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let item = ready!(self.rx.poll_recv(cx));
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        Poll::Ready(item)
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.abandon_source(self.number);
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("number", &self.number)
            .field("finished", &self.finished)
            .finish()
    }
}
