use clap::Args;

use shoal_daemon::state::AppState;
use shoal_daemon::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Override the peer port (default from config)
    #[arg(long)]
    pub peer_port: Option<u16>,

    /// Only dial out, never accept connections
    #[arg(long)]
    pub no_listen: bool,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    StateError(#[from] shoal_daemon::state::StateError),

    #[error("daemon failed: {0}")]
    Failed(String),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let mut config = ServiceConfig::from_state(&state)?;

        let port = self.peer_port.unwrap_or(state.config.peer_port);
        config.listen_addr = (!self.no_listen).then(|| format!("0.0.0.0:{}", port));
        config.log_dir = self.log_dir.clone();
        config.log_level = self.log_level;

        spawn_service(&config)
            .await
            .map_err(|e| DaemonError::Failed(e.to_string()))?;
        Ok("daemon ended".to_string())
    }
}
