//! Which peer to ask for which feed.
//!
//! Every `(followee, peer)` pair carries a byte score. Receiving a message
//! from a peer for a followee is the only reward. Being picked costs a
//! fraction of the score, so peers that stop delivering fade out while
//! everybody keeps a nonzero chance through the smoothing term.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::address::Address;
use crate::ids::FeedId;

/// Tuning constants for the ranking table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Scores saturate here
    pub max_score: u8,
    /// Added to every score when weighting, so no peer is ever starved
    pub smoothing: u32,
    /// Fraction of the score charged each time a pair is recommended
    pub selection_cost: f64,
    /// Starting score when the peer is the followee itself
    pub self_score: u8,
    /// Starting score for every other pair
    pub initial_score: u8,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            max_score: 255,
            smoothing: 1,
            selection_cost: 0.1,
            self_score: 255,
            initial_score: 0,
        }
    }
}

struct RankingState {
    followees: Vec<FeedId>,
    peers: Vec<Address>,
    /// only pairs that moved away from their starting score
    scores: HashMap<(FeedId, FeedId), u8>,
    rng: StdRng,
}

/// Sparse `followee x peer` score matrix
pub struct RankingTable {
    config: RankingConfig,
    state: Mutex<RankingState>,
    changed: Notify,
}

impl std::fmt::Debug for RankingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RankingTable")
            .field("followees", &state.followees.len())
            .field("peers", &state.peers.len())
            .finish()
    }
}

impl RankingTable {
    pub fn new(config: RankingConfig) -> Self {
        Self::with_rng(config, StdRng::from_rng(&mut rand::rng()))
    }

    /// Use a fixed generator, for reproducible selection in tests
    pub fn with_rng(config: RankingConfig, rng: StdRng) -> Self {
        Self {
            config,
            state: Mutex::new(RankingState {
                followees: Vec::new(),
                peers: Vec::new(),
                scores: HashMap::new(),
                rng,
            }),
            changed: Notify::new(),
        }
    }

    fn starting_score(&self, followee: &FeedId, peer: &FeedId) -> u8 {
        if followee == peer {
            self.config.self_score
        } else {
            self.config.initial_score
        }
    }

    pub fn add_followee(&self, followee: FeedId) {
        {
            let mut state = self.state.lock();
            if state.followees.contains(&followee) {
                return;
            }
            state.followees.push(followee);
        }
        self.changed.notify_waiters();
    }

    pub fn remove_followee(&self, followee: &FeedId) {
        let mut state = self.state.lock();
        state.followees.retain(|f| f != followee);
        state.scores.retain(|(f, _), _| f != followee);
    }

    /// Add a peer, replacing any earlier address for the same key
    pub fn add_peer(&self, address: Address) {
        {
            let mut state = self.state.lock();
            state.peers.retain(|p| p.key != address.key);
            state.peers.push(address);
        }
        self.changed.notify_waiters();
    }

    pub fn remove_peer(&self, peer: &FeedId) {
        let mut state = self.state.lock();
        state.peers.retain(|p| &p.key != peer);
        state.scores.retain(|(_, p), _| p != peer);
    }

    pub fn followees(&self) -> Vec<FeedId> {
        self.state.lock().followees.clone()
    }

    pub fn peers(&self) -> Vec<Address> {
        self.state.lock().peers.clone()
    }

    pub fn is_followed(&self, feed: &FeedId) -> bool {
        self.state.lock().followees.contains(feed)
    }

    pub fn score(&self, followee: &FeedId, peer: &FeedId) -> u8 {
        self.state
            .lock()
            .scores
            .get(&(*followee, *peer))
            .copied()
            .unwrap_or_else(|| self.starting_score(followee, peer))
    }

    /// Reward `peer` for delivering a message of `followee`
    pub fn record_success(&self, peer: &FeedId, followee: &FeedId) {
        let start = self.starting_score(followee, peer);
        let max = self.config.max_score;
        let mut state = self.state.lock();
        let score = state.scores.entry((*followee, *peer)).or_insert(start);
        *score = score.saturating_add(1).min(max);
    }

    /// Pick a followee uniformly, then a peer for it weighted by
    /// `smoothing + score`, charging the chosen pair. `None` while either
    /// list is empty.
    pub fn try_recommendation(&self) -> Option<(FeedId, Address)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.followees.is_empty() || state.peers.is_empty() {
            return None;
        }

        let followee = state.followees[state.rng.random_range(0..state.followees.len())];

        let weights: Vec<u64> = state
            .peers
            .iter()
            .map(|peer| {
                let score = state
                    .scores
                    .get(&(followee, peer.key))
                    .copied()
                    .unwrap_or_else(|| self.starting_score(&followee, &peer.key));
                u64::from(self.config.smoothing) + u64::from(score)
            })
            .collect();
        let total: u64 = weights.iter().sum();

        let index = if total == 0 {
            state.rng.random_range(0..state.peers.len())
        } else {
            let mut pick = state.rng.random_range(0..total);
            weights
                .iter()
                .position(|w| {
                    if pick < *w {
                        true
                    } else {
                        pick -= *w;
                        false
                    }
                })
                .unwrap_or(state.peers.len() - 1)
        };
        let peer = state.peers[index].clone();

        let current = weights[index] - u64::from(self.config.smoothing);
        let charged = (current as f64 * (1.0 - self.config.selection_cost)).ceil();
        let charged = charged.clamp(0.0, f64::from(self.config.max_score)) as u8;
        state.scores.insert((followee, peer.key), charged);

        Some((followee, peer))
    }

    /// Like [`try_recommendation`](Self::try_recommendation), but waits for
    /// a followee and a peer to be added instead of returning `None`
    pub async fn recommendation(&self) -> (FeedId, Address) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // register before checking so an add in between is not lost
            notified.as_mut().enable();
            if let Some(recommendation) = self.try_recommendation() {
                return recommendation;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use std::sync::Arc;
    use std::time::Duration;

    fn feed() -> FeedId {
        FeedId::from(SecretKey::generate().unwrap().public())
    }

    fn table() -> RankingTable {
        RankingTable::with_rng(RankingConfig::default(), StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_record_success_accumulates_and_saturates() {
        let table = table();
        let (followee, peer) = (feed(), feed());
        assert_eq!(table.score(&followee, &peer), 0);

        for _ in 0..5 {
            table.record_success(&peer, &followee);
        }
        assert_eq!(table.score(&followee, &peer), 5);

        for _ in 0..300 {
            table.record_success(&peer, &followee);
        }
        assert_eq!(table.score(&followee, &peer), 255);
    }

    #[test]
    fn test_self_pair_starts_at_max() {
        let table = table();
        let author = feed();
        assert_eq!(table.score(&author, &author), 255);
        assert_eq!(table.score(&author, &feed()), 0);
    }

    #[test]
    fn test_recommendation_charges_selected_pair() {
        let table = table();
        let author = feed();
        table.add_followee(author);
        table.add_peer(Address::net("localhost", 8008, author));

        let (followee, peer) = table.try_recommendation().unwrap();
        assert_eq!(followee, author);
        assert_eq!(peer.key, author);
        // ceil(255 * 0.9)
        assert_eq!(table.score(&author, &author), 230);

        table.try_recommendation().unwrap();
        // ceil(230 * 0.9)
        assert_eq!(table.score(&author, &author), 207);
    }

    #[test]
    fn test_weighting_prefers_rewarded_peers() {
        let table = table();
        let followee = feed();
        let good = feed();
        let idle = feed();
        table.add_followee(followee);
        table.add_peer(Address::net("good", 1, good));
        table.add_peer(Address::net("idle", 2, idle));

        let mut good_picks = 0;
        for _ in 0..200 {
            for _ in 0..3 {
                table.record_success(&good, &followee);
            }
            let (_, peer) = table.try_recommendation().unwrap();
            if peer.key == good {
                good_picks += 1;
            }
        }
        assert!(good_picks > 150, "good peer picked {} times", good_picks);
    }

    #[test]
    fn test_empty_table_has_no_recommendation() {
        let table = table();
        assert!(table.try_recommendation().is_none());
        table.add_followee(feed());
        assert!(table.try_recommendation().is_none());
    }

    #[tokio::test]
    async fn test_recommendation_waits_for_peers() {
        let table = Arc::new(table());
        let followee = feed();
        table.add_followee(followee);

        let waiting = {
            let table = table.clone();
            tokio::spawn(async move { table.recommendation().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        let peer = feed();
        table.add_peer(Address::net("localhost", 8008, peer));
        let (chosen_followee, chosen_peer) =
            tokio::time::timeout(Duration::from_secs(1), waiting)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(chosen_followee, followee);
        assert_eq!(chosen_peer.key, peer);
    }
}
