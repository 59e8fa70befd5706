use clap::Args;

use common::feeds::FeedsStorageError;
use common::ids::FeedId;
use shoal_daemon::state::{AppState, StateError};

/// Print the stored messages of a feed, one JSON object per line
#[derive(Args, Debug, Clone)]
pub struct Feed {
    /// Feed to print, defaults to our own
    pub feed: Option<FeedId>,

    /// First sequence number to print
    #[arg(long, default_value_t = 1)]
    pub from: u64,

    /// Print at most this many messages
    #[arg(long)]
    pub limit: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("storage error: {0}")]
    Storage(#[from] FeedsStorageError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Feed {
    type Error = FeedError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let feed = match self.feed {
            Some(feed) => feed,
            None => state.id()?,
        };
        let feeds = state.open_feeds().await?;

        let last = feeds.last_sequence(&feed).await?;
        let mut end = last;
        if let Some(limit) = self.limit {
            end = end.min(self.from.saturating_add(limit).saturating_sub(1));
        }

        let mut lines = Vec::new();
        for sequence in self.from.max(1)..=end {
            let message = feeds.get(&feed, sequence).await?;
            lines.push(serde_json::to_string(&message.to_keyed_json())?);
        }
        if lines.is_empty() {
            return Ok(format!("no messages for {} (last sequence {})", feed, last));
        }
        Ok(lines.join("\n"))
    }
}
