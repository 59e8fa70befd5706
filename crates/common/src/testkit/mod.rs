//! Lightweight harness for multi-peer tests
//!
//! Peers talk over an in-memory transport, so a whole replication scenario
//! runs in-process without sockets.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testkit::TestNetwork;
//!
//! #[tokio::test]
//! async fn test_replicate() -> anyhow::Result<()> {
//!     let mut net = TestNetwork::new();
//!     net.add_peer("alice").await?;
//!     net.add_peer("bob").await?;
//!     net.follow_all();
//!
//!     let alice = net.peer("alice").unwrap();
//!     alice.publish(serde_json::json!({"type": "post", "text": "hi"})).await?;
//!
//!     let bob = net.peer("bob").unwrap();
//!     bob.wait_for_sequence(&alice.id(), 1, std::time::Duration::from_secs(5)).await?;
//!
//!     net.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod network;
mod peer;
mod transport;

pub use network::TestNetwork;
pub use peer::{test_agent_config, TestPeer, TEST_PORT};
pub use transport::MemoryTransport;
