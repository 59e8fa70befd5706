//! Multiplexed rpc (muxrpc) over a box stream.
//!
//! Every message is a 9 byte header followed by its body, each written as
//! box stream frames. Positive request numbers are calls the sender issued;
//! the answer travels back under the negated number. Calls are either
//! `async` (one response) or `source` (a stream of items ended by an
//! end/error frame).

mod body;
mod connection;
mod handler;
mod header;
mod source;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::box_stream::BoxStreamError;

pub use body::Body;
pub use connection::RpcConnection;
pub use handler::{
    CallType, HandlerError, ItemStream, NoMethods, Request, RequestBody, RequestHandler, Response,
};
pub use header::{BodyType, RpcHeader, HEADER_SIZE};
pub use source::Source;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("rpc connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed rpc message: {0}")]
    Framing(String),
    #[error("remote returned {name}: {message}")]
    Remote { name: String, message: String },
    #[error("rpc call timed out")]
    Timeout,
    #[error("failed to encode rpc body: {0}")]
    Encode(String),
}

impl From<BoxStreamError> for RpcError {
    fn from(err: BoxStreamError) -> Self {
        match err {
            BoxStreamError::Closed => RpcError::Closed,
            other => RpcError::Transport(other.to_string()),
        }
    }
}

/// Tuning for one rpc session
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Upper bound on waiting for an async response
    #[serde_as(as = "DurationSeconds<u64>")]
    pub call_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
        }
    }
}
