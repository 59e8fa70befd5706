use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch::Receiver as WatchReceiver;

mod agent;
mod blobs;
mod connection_manager;
mod handler;
mod peer;
mod transport;

pub use agent::{
    AgentConfig, FeedsAgent, FeedsConnection, RankingConfig, RankingTable, SyncEnd, SyncError,
    SyncOutcome,
};
pub use blobs::{fetch_blob, FetchBlobError, MAX_BLOB_SIZE};
pub use connection_manager::{ConnectError, ConnectionManager};
pub use handler::{HistoryStreamOptions, PeerRequestHandler};
pub use peer::{Peer, PeerBuilder, PeerFetchError};
pub use transport::{Listener, TcpTransport, Transport};

/// Bind the peer's listen address, if it has one, and serve until shutdown
pub async fn spawn(peer: Peer, shutdown_rx: WatchReceiver<()>) -> anyhow::Result<()> {
    let listener = match peer.listen_address() {
        Some(listen) => Some(peer.transport().bind(listen).await?),
        None => None,
    };
    serve(peer, listener, shutdown_rx).await
}

/// Run the agent and hand every inbound or newly dialled connection to it.
///  On shutdown the agent stops and every open connection is closed.
pub async fn serve(
    peer: Peer,
    listener: Option<Box<dyn Listener>>,
    mut shutdown_rx: WatchReceiver<()>,
) -> anyhow::Result<()> {
    tracing::info!(id = %peer.id(), "starting peer");

    let mut inbound =
        listener.map(|listener| peer.connections().listen(listener, shutdown_rx.clone()));
    let mut outgoing = peer.connections().subscribe_outgoing();

    let agent_handle = {
        let agent = peer.agent().clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { agent.run(shutdown_rx).await })
    };

    loop {
        let inbound_rx = inbound.clone();
        let accepted = async move {
            match inbound_rx {
                Some(rx) => rx.recv_async().await.ok(),
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown_rx.changed() => break,
            conn = accepted => match conn {
                Some(conn) => peer.agent().on_connection(conn),
                None => {
                    tracing::debug!("listener stopped");
                    inbound = None;
                }
            },
            conn = outgoing.recv() => match conn {
                Ok(conn) => peer.agent().on_connection(conn),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed outgoing connection events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!(id = %peer.id(), "shutting down peer");
    peer.connections().reset().await;
    if let Err(e) = agent_handle.await {
        tracing::error!("feeds agent task failed: {}", e);
    }
    Ok(())
}
