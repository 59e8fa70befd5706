use std::fmt::Debug;

use async_trait::async_trait;

use crate::ids::FeedId;
use crate::message::Message;

#[derive(thiserror::Error, Debug)]
pub enum FeedsStorageError {
    /// Nothing stored at this position yet
    #[error("no message {sequence} in feed {feed}")]
    NotFound { feed: FeedId, sequence: u64 },
    /// The `(feed, sequence)` slot is already taken; stored messages
    ///  are never overwritten
    #[error("message {sequence} of feed {feed} is already stored")]
    Duplicate { feed: FeedId, sequence: u64 },
    #[error("feeds storage i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode stored message: {0}")]
    Decode(String),
}

impl FeedsStorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedsStorageError::NotFound { .. })
    }
}

/// Where replicated messages live.
///
/// Positions are 1-based sequence numbers. Implementations only need to
/// hold messages; validation happens before anything is stored.
#[async_trait]
pub trait FeedsStorage: Send + Sync + Debug + 'static {
    /// Store `message` at `sequence` in `feed`
    ///
    /// # Errors
    /// * `FeedsStorageError::Duplicate` - the slot is already filled
    async fn store_message(
        &self,
        feed: &FeedId,
        sequence: u64,
        message: &Message,
    ) -> Result<(), FeedsStorageError>;

    /// Fetch the message at `sequence`
    ///
    /// # Errors
    /// * `FeedsStorageError::NotFound` - nothing stored there
    async fn get_message(&self, feed: &FeedId, sequence: u64)
        -> Result<Message, FeedsStorageError>;

    /// Highest stored sequence of `feed`, or 0 if we hold nothing
    async fn last_message(&self, feed: &FeedId) -> Result<u64, FeedsStorageError>;

    /// Every feed with at least one stored message
    async fn feeds(&self) -> Result<Vec<FeedId>, FeedsStorageError>;
}
