//! Methods this peer hosts for its remotes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::blobs::{BlobsStorage, BlobsStorageError};
use crate::box_stream::MAX_BODY_SIZE;
use crate::feeds::Feeds;
use crate::ids::{BlobId, FeedId};
use crate::message::Message;
use crate::rpc::{Body, HandlerError, Request, RequestHandler, Response};

/// Options object of a `createHistoryStream` call
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStreamOptions {
    pub id: FeedId,
    #[serde(default, alias = "seq")]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub live: bool,
    #[serde(default = "default_true")]
    pub keys: bool,
    #[serde(default = "default_true")]
    pub old: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_true() -> bool {
    true
}

/// `{key}` form some clients use instead of a bare blob id
#[derive(Deserialize)]
#[serde(untagged)]
enum BlobArg {
    Id(BlobId),
    Keyed { key: BlobId },
}

impl From<BlobArg> for BlobId {
    fn from(arg: BlobArg) -> Self {
        match arg {
            BlobArg::Id(id) | BlobArg::Keyed { key: id } => id,
        }
    }
}

fn first_arg<T: serde::de::DeserializeOwned>(request: &Request) -> Result<T, HandlerError> {
    let arg = request
        .first_arg()
        .cloned()
        .ok_or_else(|| HandlerError::InvalidArgs(format!("{} needs an argument", request.method())))?;
    serde_json::from_value(arg).map_err(|e| HandlerError::InvalidArgs(e.to_string()))
}

/// Serves `whoami`, `createHistoryStream`, `blobs.has` and `blobs.get`
#[derive(Clone)]
pub struct PeerRequestHandler {
    local: FeedId,
    feeds: Feeds,
    blobs: Arc<dyn BlobsStorage>,
}

impl std::fmt::Debug for PeerRequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRequestHandler")
            .field("local", &self.local)
            .finish()
    }
}

impl PeerRequestHandler {
    pub fn new(local: FeedId, feeds: Feeds, blobs: Arc<dyn BlobsStorage>) -> Self {
        Self {
            local,
            feeds,
            blobs,
        }
    }

    async fn history_stream(&self, options: HistoryStreamOptions) -> Response {
        // subscribe before looking at storage so nothing stored in between is missed
        let events = options.live.then(|| self.feeds.subscribe());
        let next = if options.old {
            options.sequence.unwrap_or(1).max(1)
        } else {
            match self.feeds.last_sequence(&options.id).await {
                Ok(last) => last + 1,
                Err(e) => return Response::error(HandlerError::Internal(e.to_string())),
            }
        };

        tracing::debug!(
            feed = %options.id,
            from = next,
            live = options.live,
            "serving history stream"
        );

        let state = HistoryState {
            feeds: self.feeds.clone(),
            feed: options.id,
            next,
            remaining: options.limit,
            keys: options.keys,
            events,
            done: false,
        };
        Response::Source(stream::unfold(state, HistoryState::next_item).boxed())
    }

    async fn blob_chunks(&self, id: BlobId) -> Response {
        match self.blobs.get_blob(&id).await {
            Ok(content) => {
                let chunks: Vec<Result<Body, HandlerError>> = content
                    .chunks(MAX_BODY_SIZE)
                    .map(|chunk| Ok(Body::Binary(chunk.to_vec())))
                    .collect();
                Response::Source(stream::iter(chunks).boxed())
            }
            Err(BlobsStorageError::NotFound(id)) => {
                Response::error(HandlerError::NotFound(format!("blob {}", id)))
            }
            Err(e) => Response::error(HandlerError::Internal(e.to_string())),
        }
    }
}

struct HistoryState {
    feeds: Feeds,
    feed: FeedId,
    next: u64,
    remaining: Option<usize>,
    keys: bool,
    events: Option<broadcast::Receiver<Message>>,
    done: bool,
}

impl HistoryState {
    /// Stored messages are always read back from storage in order; new
    /// message events only wake a live stream up.
    async fn next_item(mut self) -> Option<(Result<Body, HandlerError>, Self)> {
        loop {
            if self.done || self.remaining == Some(0) {
                return None;
            }

            match self.feeds.get(&self.feed, self.next).await {
                Ok(message) => {
                    self.next += 1;
                    self.remaining = self.remaining.map(|n| n - 1);
                    let item = if self.keys {
                        message.to_keyed_json()
                    } else {
                        message.value
                    };
                    return Some((Ok(Body::Json(item)), self));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    self.done = true;
                    return Some((Err(HandlerError::Internal(e.to_string())), self));
                }
            }

            let events = self.events.as_mut()?;
            loop {
                match events.recv().await {
                    Ok(message) if message.author().ok() == Some(self.feed) => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(feed = %self.feed, skipped, "history stream lagged");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }
}

#[async_trait]
impl RequestHandler for PeerRequestHandler {
    async fn handle(&self, request: Request) -> Response {
        let name: Vec<&str> = request.name.iter().map(String::as_str).collect();
        match name.as_slice() {
            ["whoami"] => Response::Async(Ok(Body::Json(json!({ "id": self.local })))),
            ["createHistoryStream"] => match first_arg::<HistoryStreamOptions>(&request) {
                Ok(options) => self.history_stream(options).await,
                Err(e) => Response::error(e),
            },
            ["blobs", "has"] => match first_arg::<BlobArg>(&request) {
                Ok(arg) => match self.blobs.has_blob(&arg.into()).await {
                    Ok(has) => Response::Async(Ok(Body::Json(Value::Bool(has)))),
                    Err(e) => Response::error(HandlerError::Internal(e.to_string())),
                },
                Err(e) => Response::error(e),
            },
            ["blobs", "get"] => match first_arg::<BlobArg>(&request) {
                Ok(arg) => self.blob_chunks(arg.into()).await,
                Err(e) => Response::error(e),
            },
            _ => {
                tracing::debug!(remote = %request.remote, method = %request.method(), "unknown method");
                Response::error(HandlerError::MethodNotFound(request.method()))
            }
        }
    }
}
