//! Cryptographic primitives for Shoal
//!
//! This module wraps the primitives the Scuttlebutt wire protocol is built on:
//!
//! - **Identity & Signing**: Ed25519 keypairs (`SecretKey`/`PublicKey`) identify
//!   peers and feed authors, and sign feed messages
//! - **Key Agreement**: X25519 Diffie-Hellman, with Ed25519 identities converted
//!   to the Montgomery curve when mixed into the handshake secret
//! - **Message Authentication**: HMAC-SHA-512-256 keyed by the network key
//! - **Encryption**: XSalsa20-Poly1305 secretboxes for handshake payloads and
//!   box stream frames
//!
//! # Security Model
//!
//! Long-term private keys never leave this module in any form other than a
//! signature or a Diffie-Hellman output. Session keys are derived by the
//! handshake and owned by the box stream afterwards.

mod keys;

pub mod auth;
pub mod secret_box;

pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

use sha2::{Digest, Sha256};

/// SHA-256 over the concatenation of `parts`
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
