use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::storage::{FeedsStorage, FeedsStorageError};
use crate::ids::FeedId;
use crate::message::Message;

/// In-memory feeds storage, for tests and throwaway peers
#[derive(Debug, Clone, Default)]
pub struct MemoryFeedsStorage {
    /// feed -> sequence -> message
    inner: Arc<RwLock<HashMap<FeedId, BTreeMap<u64, Message>>>>,
}

impl MemoryFeedsStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedsStorage for MemoryFeedsStorage {
    async fn store_message(
        &self,
        feed: &FeedId,
        sequence: u64,
        message: &Message,
    ) -> Result<(), FeedsStorageError> {
        let mut inner = self.inner.write();
        let messages = inner.entry(*feed).or_default();
        if messages.contains_key(&sequence) {
            return Err(FeedsStorageError::Duplicate {
                feed: *feed,
                sequence,
            });
        }
        messages.insert(sequence, message.clone());
        Ok(())
    }

    async fn get_message(
        &self,
        feed: &FeedId,
        sequence: u64,
    ) -> Result<Message, FeedsStorageError> {
        self.inner
            .read()
            .get(feed)
            .and_then(|messages| messages.get(&sequence))
            .cloned()
            .ok_or(FeedsStorageError::NotFound {
                feed: *feed,
                sequence,
            })
    }

    async fn last_message(&self, feed: &FeedId) -> Result<u64, FeedsStorageError> {
        Ok(self
            .inner
            .read()
            .get(feed)
            .and_then(|messages| messages.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn feeds(&self) -> Result<Vec<FeedId>, FeedsStorageError> {
        let inner = self.inner.read();
        let mut feeds: Vec<FeedId> = inner
            .iter()
            .filter(|(_, messages)| !messages.is_empty())
            .map(|(feed, _)| *feed)
            .collect();
        feeds.sort();
        Ok(feeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use serde_json::json;

    #[tokio::test]
    async fn test_store_and_reject_duplicate() {
        let storage = MemoryFeedsStorage::new();
        let secret = SecretKey::generate().unwrap();
        let feed = FeedId::from(secret.public());
        let msg = Message::create(&secret, None, &json!({"type": "test"}), 1).unwrap();

        assert_eq!(storage.last_message(&feed).await.unwrap(), 0);
        assert!(storage.get_message(&feed, 1).await.unwrap_err().is_not_found());

        storage.store_message(&feed, 1, &msg).await.unwrap();
        assert_eq!(storage.last_message(&feed).await.unwrap(), 1);
        assert_eq!(storage.get_message(&feed, 1).await.unwrap(), msg);
        assert_eq!(storage.feeds().await.unwrap(), vec![feed]);

        assert!(matches!(
            storage.store_message(&feed, 1, &msg).await,
            Err(FeedsStorageError::Duplicate { sequence: 1, .. })
        ));
    }
}
