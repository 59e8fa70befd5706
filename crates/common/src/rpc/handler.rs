use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::body::Body;
use crate::ids::FeedId;

/// Kind of call carried in a request body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Async,
    Source,
    Sink,
    Duplex,
}

/// Request body as sent on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBody {
    pub name: Vec<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(rename = "type", default = "default_call_type")]
    pub kind: CallType,
}

fn default_call_type() -> CallType {
    CallType::Async
}

/// A request issued by the remote side, as seen by a handler
#[derive(Debug, Clone)]
pub struct Request {
    /// Who is asking
    pub remote: FeedId,
    /// Request number chosen by the remote
    pub request_number: i32,
    pub name: Vec<String>,
    pub args: Vec<Value>,
    pub kind: CallType,
}

impl Request {
    pub fn method(&self) -> String {
        self.name.join(".")
    }

    /// First argument, which by convention holds the options object
    pub fn first_arg(&self) -> Option<&Value> {
        self.args.first()
    }
}

/// Error reported back to the remote in an end frame
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    /// The `{name, message}` body sent with the end/error flag
    pub fn to_body(&self) -> Body {
        Body::Json(json!({
            "name": "Error",
            "message": self.to_string(),
        }))
    }
}

pub type ItemStream = Pin<Box<dyn Stream<Item = Result<Body, HandlerError>> + Send>>;

/// What a handler produces for one request
pub enum Response {
    Async(Result<Body, HandlerError>),
    Source(ItemStream),
}

impl Response {
    pub fn error(err: HandlerError) -> Self {
        Response::Async(Err(err))
    }
}

/// Resolves locally hosted methods for requests the remote sends us
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

/// Handler that hosts nothing
#[derive(Debug, Clone, Default)]
pub struct NoMethods;

#[async_trait]
impl RequestHandler for NoMethods {
    async fn handle(&self, request: Request) -> Response {
        Response::error(HandlerError::MethodNotFound(request.method()))
    }
}
