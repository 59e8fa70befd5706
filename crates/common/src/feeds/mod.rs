//! Feed storage and the shared handle the rest of the peer uses.
//!
//! `FeedsStorage` is the narrow capability a backend implements; `Feeds`
//! wraps one and announces every newly stored message on a broadcast
//! channel so live history streams can forward it.

mod fs;
mod memory;
mod storage;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use crate::crypto::SecretKey;
use crate::ids::FeedId;
use crate::message::{Message, MessageError};

pub use fs::FsFeedsStorage;
pub use memory::MemoryFeedsStorage;
pub use storage::{FeedsStorage, FeedsStorageError};

/// How many unread new-message events a slow subscriber may lag behind
const EVENT_CAPACITY: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("storage error: {0}")]
    Storage(#[from] FeedsStorageError),
    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

/// Shared handle over a feeds storage
#[derive(Clone)]
pub struct Feeds {
    storage: Arc<dyn FeedsStorage>,
    events: broadcast::Sender<Message>,
    publish_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Feeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feeds")
            .field("storage", &self.storage)
            .finish()
    }
}

impl Feeds {
    pub fn new(storage: Arc<dyn FeedsStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            events,
            publish_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryFeedsStorage::new()))
    }

    pub fn storage(&self) -> &Arc<dyn FeedsStorage> {
        &self.storage
    }

    /// Receive every message stored from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    /// Store a message and announce it
    pub async fn store(
        &self,
        feed: &FeedId,
        sequence: u64,
        message: &Message,
    ) -> Result<(), FeedsStorageError> {
        self.storage.store_message(feed, sequence, message).await?;
        // no subscribers is fine
        let _ = self.events.send(message.clone());
        Ok(())
    }

    pub async fn get(&self, feed: &FeedId, sequence: u64) -> Result<Message, FeedsStorageError> {
        self.storage.get_message(feed, sequence).await
    }

    pub async fn last_sequence(&self, feed: &FeedId) -> Result<u64, FeedsStorageError> {
        self.storage.last_message(feed).await
    }

    pub async fn feeds(&self) -> Result<Vec<FeedId>, FeedsStorageError> {
        self.storage.feeds().await
    }

    /// Append `content` to `secret`'s own feed
    pub async fn publish(&self, secret: &SecretKey, content: Value) -> Result<Message, PublishError> {
        let _guard = self.publish_lock.lock().await;

        let feed = FeedId::from(secret.public());
        let last = self.last_sequence(&feed).await?;
        let previous = if last == 0 {
            None
        } else {
            Some(self.get(&feed, last).await?)
        };

        let timestamp = chrono::Utc::now().timestamp_millis();
        let message = Message::create(secret, previous.as_ref(), &content, timestamp)?;
        self.store(&feed, last + 1, &message).await?;
        tracing::info!(feed = %feed, sequence = last + 1, key = %message.key, "published message");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_chains_and_notifies() {
        let feeds = Feeds::memory();
        let secret = SecretKey::generate().unwrap();
        let mut events = feeds.subscribe();

        let first = feeds
            .publish(&secret, json!({"type": "test", "value": 1}))
            .await
            .unwrap();
        let second = feeds
            .publish(&secret, json!({"type": "test", "value": 2}))
            .await
            .unwrap();

        assert_eq!(second.previous().unwrap(), Some(first.key));
        assert_eq!(second.sequence().unwrap(), 2);
        assert_eq!(events.recv().await.unwrap().key, first.key);
        assert_eq!(events.recv().await.unwrap().key, second.key);

        let feed = FeedId::from(secret.public());
        assert_eq!(feeds.last_sequence(&feed).await.unwrap(), 2);
    }
}
