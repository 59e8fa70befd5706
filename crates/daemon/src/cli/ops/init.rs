use clap::Args;

use common::network_key::NetworkKey;
use shoal_daemon::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Port to accept peer connections on
    #[arg(long)]
    pub peer_port: Option<u16>,

    /// Join a network other than the main Scuttlebutt network (base64)
    #[arg(long)]
    pub network_key: Option<NetworkKey>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig::default();
        if let Some(port) = self.peer_port {
            config.peer_port = port;
        }
        if let Some(network_key) = self.network_key {
            config.network_key = network_key;
        }

        let state = AppState::init(ctx.config_path.clone(), config)?;
        Ok(format!(
            "Initialized {}\nid: {}",
            state.shoal_dir.display(),
            state.id()?
        ))
    }
}
