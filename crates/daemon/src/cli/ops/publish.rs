use clap::Args;
use serde_json::Value;

use common::feeds::PublishError;
use shoal_daemon::state::{AppState, StateError};

/// Append a message to our own feed
#[derive(Args, Debug, Clone)]
pub struct Publish {
    /// Message content as JSON, e.g. '{"type":"post","text":"hello"}'
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishOpError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("content is not valid json: {0}")]
    InvalidContent(#[from] serde_json::Error),
    #[error("content must be an object with a \"type\" field")]
    MissingType,
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Publish {
    type Error = PublishOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let content: Value = serde_json::from_str(&self.content)?;
        if !content.get("type").is_some_and(Value::is_string) {
            return Err(PublishOpError::MissingType);
        }

        let state = AppState::load(ctx.config_path.clone())?;
        let secret = state.load_key()?;
        let feeds = state.open_feeds().await?;

        let message = feeds.publish(&secret, content).await?;
        Ok(format!(
            "{} (sequence {})",
            message.key,
            message.sequence().unwrap_or_default()
        ))
    }
}
