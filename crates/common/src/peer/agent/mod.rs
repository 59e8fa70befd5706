//! Feed replication driver.
//!
//! The agent keeps asking the ranking table which `(followee, peer)` pair
//! to try next and runs one history-stream sync per pair. Inbound and
//! externally opened connections are handed to [`FeedsAgent::on_connection`],
//! which syncs every followee from that remote.

mod ranking;
mod sync_feed;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tokio::sync::watch::Receiver as WatchReceiver;
use tokio::sync::Notify;

use super::connection_manager::ConnectionManager;
use crate::address::Address;
use crate::feeds::Feeds;
use crate::ids::FeedId;
use crate::rpc::RpcConnection;

pub use ranking::{RankingConfig, RankingTable};
pub use sync_feed::{FeedsConnection, SyncEnd, SyncError, SyncOutcome};

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Close a connection whose history stream stays silent this long
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub idle_timeout: Duration,
    /// Keep history streams open for new messages after catching up
    pub live: bool,
    /// Base delay between connection attempts, scaled by ongoing syncs
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub throttle: Duration,
    pub ranking: RankingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            live: true,
            throttle: Duration::from_millis(50),
            ranking: RankingConfig::default(),
        }
    }
}

type Pair = (FeedId, FeedId);

struct AgentInner {
    local: FeedId,
    config: AgentConfig,
    feeds: Feeds,
    connections: ConnectionManager,
    ranking: RankingTable,
    /// `(followee, peer)` pairs with a sync in flight
    ongoing: Mutex<HashSet<Pair>>,
    /// an ongoing sync finished or a peer was added
    changed: Notify,
}

/// Removes its pair from the ongoing set however the sync task ends
struct OngoingGuard {
    inner: Arc<AgentInner>,
    pair: Pair,
}

impl Drop for OngoingGuard {
    fn drop(&mut self) {
        self.inner.ongoing.lock().remove(&self.pair);
        self.inner.changed.notify_waiters();
    }
}

#[derive(Clone)]
pub struct FeedsAgent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for FeedsAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedsAgent")
            .field("local", &self.inner.local)
            .field("ranking", &self.inner.ranking)
            .field("ongoing", &self.inner.ongoing.lock().len())
            .finish()
    }
}

impl FeedsAgent {
    pub fn new(
        local: FeedId,
        feeds: Feeds,
        connections: ConnectionManager,
        config: AgentConfig,
    ) -> Self {
        let ranking = RankingTable::new(config.ranking.clone());
        Self::with_ranking(local, feeds, connections, config, ranking)
    }

    /// Use a prepared ranking table, e.g. one with a seeded generator
    pub fn with_ranking(
        local: FeedId,
        feeds: Feeds,
        connections: ConnectionManager,
        config: AgentConfig,
        ranking: RankingTable,
    ) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                local,
                config,
                feeds,
                connections,
                ranking,
                ongoing: Mutex::new(HashSet::new()),
                changed: Notify::new(),
            }),
        }
    }

    pub fn ranking(&self) -> &RankingTable {
        &self.inner.ranking
    }

    pub fn follow(&self, feed: FeedId) {
        tracing::debug!(feed = %feed, "following feed");
        self.inner.ranking.add_followee(feed);
    }

    pub fn unfollow(&self, feed: &FeedId) {
        tracing::debug!(feed = %feed, "unfollowing feed");
        self.inner.ranking.remove_followee(feed);
    }

    pub fn add_peer(&self, address: Address) {
        if address.key == self.inner.local {
            tracing::warn!("not adding {} as a peer, it is our own identity", address);
            return;
        }
        tracing::debug!(peer = %address.key, "adding peer {}", address);
        self.inner.ranking.add_peer(address);
        self.inner.changed.notify_waiters();
    }

    pub fn remove_peer(&self, peer: &FeedId) {
        self.inner.ranking.remove_peer(peer);
    }

    pub fn followees(&self) -> Vec<FeedId> {
        self.inner.ranking.followees()
    }

    pub fn peers(&self) -> Vec<Address> {
        self.inner.ranking.peers()
    }

    /// Number of syncs currently in flight
    pub fn ongoing(&self) -> usize {
        self.inner.ongoing.lock().len()
    }

    /// Claim `pair` unless a sync for it is already running
    fn claim(&self, pair: Pair) -> Option<OngoingGuard> {
        if !self.inner.ongoing.lock().insert(pair) {
            return None;
        }
        Some(OngoingGuard {
            inner: self.inner.clone(),
            pair,
        })
    }

    fn feeds_connection(&self, conn: RpcConnection) -> FeedsConnection {
        FeedsConnection::new(
            conn,
            self.inner.feeds.clone(),
            self.inner.config.idle_timeout,
            self.inner.config.live,
        )
    }

    /// Sync every followee from the remote end of `conn`
    pub fn on_connection(&self, conn: RpcConnection) {
        let peer = conn.remote_id();
        let followees = self.inner.ranking.followees();
        tracing::debug!(peer = %peer, followees = followees.len(), "syncing followees from connection");

        for followee in followees {
            let Some(guard) = self.claim((followee, peer)) else {
                continue;
            };
            let agent = self.clone();
            let feeds_conn = self.feeds_connection(conn.clone());
            tokio::spawn(async move {
                let _guard = guard;
                agent.sync_pair(&feeds_conn, followee).await;
            });
        }
    }

    async fn sync_pair(&self, conn: &FeedsConnection, followee: FeedId) {
        let peer = conn.remote_id();
        let ranking = &self.inner.ranking;
        match conn
            .sync_feed(&followee, |_| ranking.record_success(&peer, &followee))
            .await
        {
            Ok(outcome) => tracing::debug!(
                feed = %followee,
                peer = %peer,
                received = outcome.received,
                "sync ended: {:?}",
                outcome.end
            ),
            Err(e) => tracing::warn!(feed = %followee, peer = %peer, "sync aborted: {}", e),
        }
    }

    /// Connect to `address` and sync `followee`, unless shut down first
    async fn attempt(&self, followee: FeedId, address: Address, mut shutdown_rx: WatchReceiver<()>) {
        let conn = tokio::select! {
            _ = shutdown_rx.changed() => return,
            conn = self.inner.connections.get_connection_with(&address) => conn,
        };
        let conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                tracing::info!(peer = %address.key, "could not connect to {}: {}", address, e);
                return;
            }
        };

        let feeds_conn = self.feeds_connection(conn);
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = self.sync_pair(&feeds_conn, followee) => {}
        }
    }

    /// Wait until no more syncs are running than there are peers
    async fn stand_by(&self) {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.ongoing() <= self.inner.ranking.peers().len() {
                return;
            }
            notified.await;
        }
    }

    /// Keep launching syncs for recommended pairs until shutdown
    pub async fn run(&self, mut shutdown_rx: WatchReceiver<()>) {
        tracing::info!("feeds agent started");
        loop {
            let (followee, address) = tokio::select! {
                _ = shutdown_rx.changed() => break,
                recommendation = self.inner.ranking.recommendation() => recommendation,
            };

            match self.claim((followee, address.key)) {
                Some(guard) => {
                    tracing::debug!(feed = %followee, peer = %address.key, "starting sync attempt");
                    let agent = self.clone();
                    let shutdown_rx = shutdown_rx.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        agent.attempt(followee, address, shutdown_rx).await;
                    });
                }
                None => {
                    tracing::trace!(feed = %followee, peer = %address.key, "sync already running");
                }
            }

            let delay = self.inner.config.throttle * (1 + self.ongoing() as u32);
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = self.stand_by() => {}
            }
        }
        tracing::info!("feeds agent stopped");
    }
}
