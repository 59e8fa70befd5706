//! Sigil-prefixed identifiers used throughout the protocol.
//!
//! - `@<base64>.ed25519` : a feed (an author / peer identity)
//! - `&<base64>.sha256`  : a blob (immutable binary content)
//! - `%<base64>.sha256`  : a message key (hash of a message value)

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::crypto::{sha256, PublicKey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("missing sigil '{0}'")]
    MissingSigil(char),
    #[error("missing suffix '{0}'")]
    MissingSuffix(&'static str),
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
    #[error("invalid ed25519 key")]
    InvalidKey,
}

fn decode_32(s: &str, sigil: char, suffix: &'static str) -> Result<[u8; 32], IdError> {
    let rest = s.strip_prefix(sigil).ok_or(IdError::MissingSigil(sigil))?;
    let b64 = rest
        .strip_suffix(suffix)
        .ok_or(IdError::MissingSuffix(suffix))?;
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| IdError::Base64(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(IdError::Length(bytes.len()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Identity of a feed: the author's Ed25519 public key
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct FeedId(PublicKey);

impl FeedId {
    pub fn public_key(&self) -> &PublicKey {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl From<PublicKey> for FeedId {
    fn from(key: PublicKey) -> Self {
        FeedId(key)
    }
}

impl From<FeedId> for PublicKey {
    fn from(id: FeedId) -> Self {
        id.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}.ed25519", self.0.to_base64())
    }
}

impl FromStr for FeedId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_32(s, '@', ".ed25519")?;
        let key = PublicKey::try_from(bytes).map_err(|_| IdError::InvalidKey)?;
        Ok(FeedId(key))
    }
}

macro_rules! sha256_id {
    ($(#[$meta:meta])* $name:ident, $sigil:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
        )]
        pub struct $name([u8; 32]);

        impl $name {
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                $name(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Hex form of the digest, used for on-disk file names
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}.sha256", $sigil, STANDARD.encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = IdError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_32(s, $sigil, ".sha256").map($name)
            }
        }
    };
}

sha256_id!(
    /// SHA-256 digest identifying a blob
    BlobId,
    '&'
);

sha256_id!(
    /// SHA-256 digest of a message value
    MsgKey,
    '%'
);

impl BlobId {
    /// Hash content into the id it will be stored under
    pub fn of(content: &[u8]) -> Self {
        BlobId(sha256(&[content]))
    }
}
