/**
 * Multiserver addresses: where a peer lives and
 *  which key it must prove it holds.
 */
pub mod address;
pub mod blobs;
pub mod box_stream;
/**
 * Cryptographic types and operations.
 *  - Ed25519 identities and signatures
 *  - HMAC and secretbox primitives used on the wire
 */
pub mod crypto;
pub mod feeds;
pub mod handshake;
pub mod ids;
pub mod message;
/// Which Scuttlebutt network a peer belongs to
pub mod network_key;
/**
 * The running peer: transports, connection
 *  manager, hosted methods and the feeds agent
 *  that drives replication.
 */
pub mod peer;
pub mod rpc;
pub mod testkit;
/// Build version information, captured at compile time
pub mod version;

pub mod prelude {
    pub use crate::address::Address;
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::feeds::Feeds;
    pub use crate::ids::{BlobId, FeedId, MsgKey};
    pub use crate::message::Message;
    pub use crate::network_key::NetworkKey;
    pub use crate::peer::{Peer, PeerBuilder};
    pub use crate::version::BuildInfo;
}
