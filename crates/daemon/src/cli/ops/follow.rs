use clap::Args;

use common::ids::FeedId;
use shoal_daemon::state::{AppState, StateError};

/// Replicate a feed
#[derive(Args, Debug, Clone)]
pub struct Follow {
    /// Feed id, e.g. @<base64>.ed25519
    pub feed: FeedId,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Follow {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut state = AppState::load(ctx.config_path.clone())?;
        if state.config.follow.contains(&self.feed) {
            return Ok(format!("already following {}", self.feed));
        }
        state.config.follow.push(self.feed);
        state.save_config()?;
        Ok(format!("following {}", self.feed))
    }
}

/// Stop replicating a feed. Messages already stored are kept.
#[derive(Args, Debug, Clone)]
pub struct Unfollow {
    pub feed: FeedId,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Unfollow {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut state = AppState::load(ctx.config_path.clone())?;
        let before = state.config.follow.len();
        state.config.follow.retain(|feed| feed != &self.feed);
        if state.config.follow.len() == before {
            return Ok(format!("not following {}", self.feed));
        }
        state.save_config()?;
        Ok(format!("unfollowed {}", self.feed))
    }
}
