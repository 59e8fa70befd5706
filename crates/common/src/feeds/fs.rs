use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::storage::{FeedsStorage, FeedsStorageError};
use crate::crypto::PublicKey;
use crate::ids::FeedId;
use crate::message::Message;

/// Feeds stored on disk: one directory per feed (hex of the author key),
/// one `<sequence>.json` file per message
#[derive(Debug, Clone)]
pub struct FsFeedsStorage {
    root: PathBuf,
}

impl FsFeedsStorage {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, FeedsStorageError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn feed_dir(&self, feed: &FeedId) -> PathBuf {
        self.root.join(hex::encode(feed.to_bytes()))
    }

    fn message_path(&self, feed: &FeedId, sequence: u64) -> PathBuf {
        self.feed_dir(feed).join(format!("{}.json", sequence))
    }
}

#[async_trait]
impl FeedsStorage for FsFeedsStorage {
    async fn store_message(
        &self,
        feed: &FeedId,
        sequence: u64,
        message: &Message,
    ) -> Result<(), FeedsStorageError> {
        tokio::fs::create_dir_all(self.feed_dir(feed)).await?;
        let data = serde_json::to_vec(message)
            .map_err(|e| FeedsStorageError::Decode(e.to_string()))?;

        // write under a private name, then link into place; `<sequence>.json`
        // only ever appears complete
        let path = self.message_path(feed, sequence);
        let tmp = self.feed_dir(feed).join(format!(
            ".{}.{:016x}.tmp",
            sequence,
            rand::random::<u64>()
        ));
        if let Err(e) = write_synced(&tmp, &data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        // the link never replaces an existing message
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            tracing::warn!("failed to remove {:?}: {}", tmp, e);
        }
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(FeedsStorageError::Duplicate {
                feed: *feed,
                sequence,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_message(
        &self,
        feed: &FeedId,
        sequence: u64,
    ) -> Result<Message, FeedsStorageError> {
        let data = match tokio::fs::read(self.message_path(feed, sequence)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FeedsStorageError::NotFound {
                    feed: *feed,
                    sequence,
                })
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data).map_err(|e| FeedsStorageError::Decode(e.to_string()))
    }

    async fn last_message(&self, feed: &FeedId) -> Result<u64, FeedsStorageError> {
        let mut entries = match tokio::fs::read_dir(self.feed_dir(feed)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut last = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let sequence = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(sequence) = sequence {
                last = last.max(sequence);
            }
        }
        Ok(last)
    }

    async fn feeds(&self) -> Result<Vec<FeedId>, FeedsStorageError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut feeds = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let key = hex::decode(&name)
                .ok()
                .and_then(|bytes| PublicKey::try_from(bytes.as_slice()).ok());
            match key {
                Some(key) => feeds.push(FeedId::from(key)),
                None => tracing::debug!("skipping unrecognised entry in feeds dir: {}", name),
            }
        }
        feeds.sort();
        Ok(feeds)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.sync_all().await
}
