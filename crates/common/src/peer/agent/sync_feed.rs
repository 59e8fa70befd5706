use std::time::Duration;

use serde_json::{json, Value};

use crate::feeds::{Feeds, FeedsStorageError};
use crate::ids::{FeedId, MsgKey};
use crate::message::{Message, MessageError};
use crate::rpc::{Body, RpcConnection, RpcError};

/// Reasons a single feed sync is abandoned. The connection stays usable for
/// other feeds unless the error is [`SyncError::Rpc`].
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("expected sequence {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
    #[error("message authored by {got}, expected {expected}")]
    WrongAuthor { expected: FeedId, got: FeedId },
    #[error("message {sequence} does not hash to its key")]
    HashMismatch { sequence: u64 },
    #[error("message {sequence} has an invalid signature")]
    InvalidSignature { sequence: u64 },
    #[error("message {sequence} does not point at the previous message")]
    BrokenChain { sequence: u64 },
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("storage error: {0}")]
    Storage(#[from] FeedsStorageError),
}

impl From<MessageError> for SyncError {
    fn from(e: MessageError) -> Self {
        SyncError::Malformed(e.to_string())
    }
}

/// How a sync that did not fail came to a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEnd {
    /// The remote ended the history stream
    StreamEnded,
    /// Nothing arrived within the idle window; the connection was closed
    IdleTimeout,
    ConnectionClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Messages verified and stored during this sync
    pub received: u64,
    pub end: SyncEnd,
}

/// Replicates feeds from one remote over its rpc connection
#[derive(Clone)]
pub struct FeedsConnection {
    conn: RpcConnection,
    feeds: Feeds,
    idle_timeout: Duration,
    live: bool,
}

impl FeedsConnection {
    pub fn new(conn: RpcConnection, feeds: Feeds, idle_timeout: Duration, live: bool) -> Self {
        Self {
            conn,
            feeds,
            idle_timeout,
            live,
        }
    }

    pub fn remote_id(&self) -> FeedId {
        self.conn.remote_id()
    }

    /// Pull `feed` from the remote starting after our latest stored message.
    ///
    /// Each message is checked for sequence continuity, key, signature and
    /// chain link before it is stored; `on_message` runs for every message
    /// that passes. If the remote goes quiet for longer than the idle window
    /// the whole connection is closed.
    pub async fn sync_feed<F>(&self, feed: &FeedId, mut on_message: F) -> Result<SyncOutcome, SyncError>
    where
        F: FnMut(&Message),
    {
        let last = self.feeds.last_sequence(feed).await?;
        let mut previous: Option<MsgKey> = if last == 0 {
            None
        } else {
            Some(self.feeds.get(feed, last).await?.key)
        };
        let mut expected = last + 1;

        tracing::debug!(
            feed = %feed,
            peer = %self.conn.remote_id(),
            from = expected,
            "syncing feed"
        );

        let options = json!({
            "id": feed,
            "sequence": expected,
            "live": self.live,
            "keys": true,
            "old": true,
        });
        let mut source = self
            .conn
            .call_source(&["createHistoryStream"], vec![options])
            .await?;

        let mut received = 0;
        loop {
            let item = match tokio::time::timeout(self.idle_timeout, source.read()).await {
                Err(_) => {
                    tracing::info!(
                        feed = %feed,
                        peer = %self.conn.remote_id(),
                        "no message for {:?}, closing connection",
                        self.idle_timeout
                    );
                    self.conn.close().await;
                    return Ok(SyncOutcome {
                        received,
                        end: SyncEnd::IdleTimeout,
                    });
                }
                Ok(None) => {
                    return Ok(SyncOutcome {
                        received,
                        end: SyncEnd::StreamEnded,
                    })
                }
                Ok(Some(Err(RpcError::Closed))) => {
                    return Ok(SyncOutcome {
                        received,
                        end: SyncEnd::ConnectionClosed,
                    })
                }
                Ok(Some(item)) => item?,
            };

            let message = parse_item(item)?;
            verify(&message, feed, expected, previous.as_ref())?;

            match self.feeds.store(feed, expected, &message).await {
                Ok(()) => {
                    received += 1;
                    previous = Some(message.key);
                }
                Err(FeedsStorageError::Duplicate { sequence, .. }) => {
                    // the next link has to follow what we kept, not what we got
                    let stored = self.feeds.get(feed, sequence).await?;
                    if stored.key != message.key {
                        tracing::warn!(feed = %feed, sequence, "stored message differs from the one received");
                    } else {
                        tracing::debug!(feed = %feed, sequence, "message already stored");
                    }
                    previous = Some(stored.key);
                }
                Err(e) => return Err(e.into()),
            }
            on_message(&message);
            expected += 1;
        }
    }
}

fn parse_item(body: Body) -> Result<Message, SyncError> {
    let value = match body {
        Body::Json(value) => value,
        other => {
            return Err(SyncError::Malformed(format!(
                "expected a json item, got {:?}",
                other.body_type()
            )))
        }
    };

    // keyed items carry the claimed key; bare values are keyed by their hash
    if value.get("key").is_some() && value.get("value").is_some() {
        serde_json::from_value(value).map_err(|e| SyncError::Malformed(e.to_string()))
    } else if let Value::Object(_) = value {
        Ok(Message::from_value(value)?)
    } else {
        Err(SyncError::Malformed("item is not an object".to_string()))
    }
}

fn verify(
    message: &Message,
    feed: &FeedId,
    expected: u64,
    previous: Option<&MsgKey>,
) -> Result<(), SyncError> {
    let sequence = message.sequence()?;
    if sequence != expected {
        return Err(SyncError::SequenceGap {
            expected,
            got: sequence,
        });
    }

    let author = message.author()?;
    if &author != feed {
        return Err(SyncError::WrongAuthor {
            expected: *feed,
            got: author,
        });
    }

    message
        .check_key()
        .map_err(|_| SyncError::HashMismatch { sequence })?;

    match message.verify_signature() {
        Ok(()) => {}
        Err(MessageError::InvalidSignature) => return Err(SyncError::InvalidSignature { sequence }),
        Err(e) => return Err(e.into()),
    }

    // with a fresh feed and a resumed sync alike, `previous` is the key
    // stored at `sequence - 1`
    if message.previous()?.as_ref() != previous {
        return Err(SyncError::BrokenChain { sequence });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    fn chain(secret: &SecretKey, n: usize) -> Vec<Message> {
        let mut messages: Vec<Message> = Vec::new();
        for i in 0..n {
            let message =
                Message::create(secret, messages.last(), &json!({"type": "test", "i": i}), 1000)
                    .unwrap();
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_verify_accepts_valid_chain() {
        let secret = SecretKey::generate().unwrap();
        let feed = FeedId::from(secret.public());
        let messages = chain(&secret, 3);

        verify(&messages[0], &feed, 1, None).unwrap();
        verify(&messages[1], &feed, 2, Some(&messages[0].key)).unwrap();
        verify(&messages[2], &feed, 3, Some(&messages[1].key)).unwrap();
    }

    #[test]
    fn test_verify_rejects_gap() {
        let secret = SecretKey::generate().unwrap();
        let feed = FeedId::from(secret.public());
        let messages = chain(&secret, 2);

        let err = verify(&messages[1], &feed, 1, None).unwrap_err();
        assert!(matches!(
            err,
            SyncError::SequenceGap {
                expected: 1,
                got: 2
            }
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_author() {
        let secret = SecretKey::generate().unwrap();
        let other = FeedId::from(SecretKey::generate().unwrap().public());
        let messages = chain(&secret, 1);

        let err = verify(&messages[0], &other, 1, None).unwrap_err();
        assert!(matches!(err, SyncError::WrongAuthor { .. }));
    }

    #[test]
    fn test_verify_rejects_claimed_key_mismatch() {
        let secret = SecretKey::generate().unwrap();
        let feed = FeedId::from(secret.public());
        let mut message = chain(&secret, 1).remove(0);
        message.key = MsgKey::from_bytes([9u8; 32]);

        let err = verify(&message, &feed, 1, None).unwrap_err();
        assert!(matches!(err, SyncError::HashMismatch { sequence: 1 }));
    }

    #[test]
    fn test_verify_rejects_tampered_content() {
        let secret = SecretKey::generate().unwrap();
        let feed = FeedId::from(secret.public());
        let message = chain(&secret, 1).remove(0);

        let mut value = message.value.clone();
        value["content"]["i"] = json!(99);
        // rekey so only the signature is wrong
        let tampered = Message::from_value(value).unwrap();

        let err = verify(&tampered, &feed, 1, None).unwrap_err();
        assert!(matches!(err, SyncError::InvalidSignature { sequence: 1 }));
    }

    #[test]
    fn test_verify_rejects_broken_chain() {
        let secret = SecretKey::generate().unwrap();
        let feed = FeedId::from(secret.public());
        let messages = chain(&secret, 2);

        let err = verify(&messages[1], &feed, 2, Some(&MsgKey::from_bytes([1u8; 32]))).unwrap_err();
        assert!(matches!(err, SyncError::BrokenChain { sequence: 2 }));
    }

    #[test]
    fn test_parse_keyed_and_bare_items() {
        let secret = SecretKey::generate().unwrap();
        let message = chain(&secret, 1).remove(0);

        let keyed = parse_item(Body::Json(message.to_keyed_json())).unwrap();
        assert_eq!(keyed, message);

        let bare = parse_item(Body::Json(message.value.clone())).unwrap();
        assert_eq!(bare.key, message.key);

        assert!(parse_item(Body::Binary(vec![1, 2])).is_err());
    }
}
