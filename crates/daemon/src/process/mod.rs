pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::blobs::{BlobsStorage, FsBlobsStorage, MemoryBlobsStorage};
use common::feeds::{FeedsStorage, FsFeedsStorage, MemoryFeedsStorage};
use common::peer::{Peer, PeerBuilder};

use crate::ServiceConfig;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle for gracefully shutting down the daemon service.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the service shuts down (via signal or explicit shutdown).
    pub async fn wait(self) {
        shutdown_and_join(self.graceful_waiter, self.handles).await;
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
fn init_logging(service_config: &ServiceConfig) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(service_config.log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    if let Some(log_dir) = &service_config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "shoal.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(service_config.log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_layer).init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

/// Open the configured storages and assemble the peer
pub async fn build_peer(service_config: &ServiceConfig) -> anyhow::Result<Peer> {
    let feeds: Arc<dyn FeedsStorage> = match &service_config.feeds_dir {
        Some(dir) => Arc::new(FsFeedsStorage::new(dir).await?),
        None => Arc::new(MemoryFeedsStorage::new()),
    };
    let blobs: Arc<dyn BlobsStorage> = match &service_config.blobs_dir {
        Some(dir) => Arc::new(FsBlobsStorage::new(dir).await?),
        None => Arc::new(MemoryBlobsStorage::new()),
    };

    let mut builder = PeerBuilder::new()
        .secret_key(service_config.secret.clone())
        .network_key(service_config.network_key)
        .feeds_storage(feeds)
        .blobs_storage(blobs)
        .rpc_config(service_config.rpc.clone())
        .agent_config(service_config.agent.clone())
        .peers(service_config.peers.clone())
        .follow(service_config.follow.clone());
    if let Some(listen) = &service_config.listen_addr {
        builder = builder.listen(listen.clone());
    }

    Ok(builder.build()?)
}

/// Build the peer from config, exiting on error.
async fn create_peer(service_config: &ServiceConfig) -> Peer {
    match build_peer(service_config).await {
        Ok(peer) => peer,
        Err(e) => {
            tracing::error!("error creating peer: {}", e);
            std::process::exit(3);
        }
    }
}

/// Wait for shutdown and join all handles with timeout.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = graceful_waiter.await;

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "Failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}

/// Build the peer and spawn it, returning a handle to it.
///
/// The returned `ShutdownHandle` must be kept alive; dropping it does not stop the service.
pub async fn start_service(service_config: &ServiceConfig) -> anyhow::Result<(Peer, ShutdownHandle)> {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let peer = create_peer(service_config).await;

    let peer_task = peer.clone();
    let peer_handle = tokio::spawn(async move {
        if let Err(e) = common::peer::spawn(peer_task, shutdown_rx).await {
            tracing::error!("Peer error: {}", e);
        }
    });

    tracing::info!(
        id = %peer.id(),
        listen = ?service_config.listen_addr,
        peers = service_config.peers.len(),
        follow = service_config.follow.len(),
        "Running peer"
    );

    let handle = ShutdownHandle {
        graceful_waiter,
        handles: vec![peer_handle],
        shutdown_tx,
    };

    Ok((peer, handle))
}

/// Spawns the peer and blocks until a shutdown signal is received.
pub async fn spawn_service(service_config: &ServiceConfig) -> anyhow::Result<()> {
    let _guards = init_logging(service_config);
    let (_, handle) = start_service(service_config).await?;
    handle.wait().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crypto::SecretKey;
    use common::network_key::NetworkKey;
    use common::peer::AgentConfig;
    use common::rpc::RpcConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn config(dir: &TempDir, secret: SecretKey) -> ServiceConfig {
        ServiceConfig {
            listen_addr: None,
            secret,
            network_key: NetworkKey::default(),
            peers: Vec::new(),
            follow: Vec::new(),
            feeds_dir: Some(dir.path().join("feeds")),
            blobs_dir: Some(dir.path().join("blobs")),
            agent: AgentConfig::default(),
            rpc: RpcConfig::default(),
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }

    #[tokio::test]
    async fn test_published_messages_survive_restart() {
        let dir = TempDir::new().unwrap();
        let secret = SecretKey::generate().unwrap();

        let peer = build_peer(&config(&dir, secret.clone())).await.unwrap();
        peer.publish(json!({"type": "post", "text": "first"}))
            .await
            .unwrap();
        let id = peer.id();
        drop(peer);

        let peer = build_peer(&config(&dir, secret)).await.unwrap();
        assert_eq!(peer.id(), id);
        assert_eq!(peer.feeds().last_sequence(&id).await.unwrap(), 1);
        let next = peer
            .publish(json!({"type": "post", "text": "second"}))
            .await
            .unwrap();
        assert_eq!(next.sequence().unwrap(), 2);
    }
}
