use std::path::PathBuf;
use std::time::Duration;

use common::address::Address;
use common::crypto::SecretKey;
use common::ids::FeedId;
use common::network_key::NetworkKey;
use common::peer::AgentConfig;
use common::rpc::RpcConfig;

use crate::state::{AppState, StateError};

#[derive(Debug)]
pub struct Config {
    // peer configuration
    /// `host:port` to accept peer connections on,
    ///  if not set then we only dial out
    pub listen_addr: Option<String>,
    /// our long-term identity
    pub secret: SecretKey,
    pub network_key: NetworkKey,
    pub peers: Vec<Address>,
    pub follow: Vec<FeedId>,

    // storage
    /// where feeds are kept, in memory if not set
    pub feeds_dir: Option<PathBuf>,
    /// where blobs are kept, in memory if not set
    pub blobs_dir: Option<PathBuf>,

    // tuning
    pub agent: AgentConfig,
    pub rpc: RpcConfig,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Everything the daemon needs from an initialized application directory
    pub fn from_state(state: &AppState) -> Result<Self, StateError> {
        let app = &state.config;
        let agent = AgentConfig {
            idle_timeout: Duration::from_secs(app.idle_timeout_secs),
            live: app.live,
            ranking: app.ranking.clone(),
            ..AgentConfig::default()
        };

        Ok(Self {
            listen_addr: Some(format!("0.0.0.0:{}", app.peer_port)),
            secret: state.load_key()?,
            network_key: app.network_key,
            peers: app.peers.clone(),
            follow: app.follow.clone(),
            feeds_dir: Some(state.feeds_path.clone()),
            blobs_dir: Some(state.blobs_path.clone()),
            agent,
            rpc: RpcConfig::default(),
            log_level: tracing::Level::INFO,
            log_dir: None,
        })
    }
}
