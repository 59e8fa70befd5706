use clap::{Args, Subcommand};

use common::address::Address;
use common::ids::FeedId;
use shoal_daemon::state::{AppState, StateError};

use crate::cli::op::Op;

/// List configured peers
#[derive(Args, Debug, Clone)]
pub struct Ls;

#[async_trait::async_trait]
impl Op for Ls {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        if state.config.peers.is_empty() {
            return Ok("no peers configured".to_string());
        }
        Ok(state
            .config
            .peers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Add a peer by multiserver address
#[derive(Args, Debug, Clone)]
pub struct Add {
    /// e.g. net:example.org:8008~shs:<base64 public key>
    pub address: Address,
}

#[async_trait::async_trait]
impl Op for Add {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut state = AppState::load(ctx.config_path.clone())?;
        if self.address.key == state.id()? {
            return Ok("refusing to add ourselves as a peer".to_string());
        }
        // one address per peer key
        state.config.peers.retain(|peer| peer.key != self.address.key);
        state.config.peers.push(self.address.clone());
        state.save_config()?;
        Ok(format!("added {}", self.address))
    }
}

/// Remove a peer by its public key
#[derive(Args, Debug, Clone)]
pub struct Rm {
    pub key: FeedId,
}

#[async_trait::async_trait]
impl Op for Rm {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut state = AppState::load(ctx.config_path.clone())?;
        let before = state.config.peers.len();
        state.config.peers.retain(|peer| peer.key != self.key);
        if state.config.peers.len() == before {
            return Ok(format!("no peer with key {}", self.key));
        }
        state.save_config()?;
        Ok(format!("removed {}", self.key))
    }
}

crate::command_enum! {
    (Ls, Ls),
    (Add, Add),
    (Rm, Rm),
}

pub type PeersCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Peers {
    #[command(subcommand)]
    pub command: PeersCommand,
}

#[async_trait::async_trait]
impl Op for Peers {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
