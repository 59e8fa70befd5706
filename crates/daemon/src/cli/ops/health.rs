use clap::Args;

use shoal_daemon::state::{AppState, StateError};

/// Check the local state directory and summarize what is stored
#[derive(Args, Debug, Clone)]
pub struct Health;

#[async_trait::async_trait]
impl crate::cli::op::Op for Health {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut lines = Vec::new();

        lines.push("Config:".to_string());
        let state = match AppState::load(ctx.config_path.clone()) {
            Ok(state) => state,
            Err(e) => {
                lines.push(format!("  error: {}", e));
                return Ok(lines.join("\n"));
            }
        };
        lines.push(format!("  directory:    {}", state.shoal_dir.display()));
        lines.push("  config.toml:  OK".to_string());
        match state.id() {
            Ok(id) => lines.push(format!("  secret.pem:   OK ({})", id)),
            Err(e) => lines.push(format!("  secret.pem:   {}", e)),
        }
        lines.push(format!("  peer_port:    {}", state.config.peer_port));
        lines.push(format!("  peers:        {}", state.config.peers.len()));

        lines.push(String::new());
        lines.push("Feeds:".to_string());
        let feeds = state.open_feeds().await?;
        for feed in &state.config.follow {
            match feeds.last_sequence(feed).await {
                Ok(sequence) => lines.push(format!("  {}  {}", feed, sequence)),
                Err(e) => lines.push(format!("  {}  error: {}", feed, e)),
            }
        }
        if state.config.follow.is_empty() {
            lines.push("  not following anyone".to_string());
        }

        Ok(lines.join("\n"))
    }
}
