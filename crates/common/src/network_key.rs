use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Size of a network key in bytes
pub const NETWORK_KEY_SIZE: usize = 32;

/// The key of the public Scuttlebutt main network
pub const MAIN_NETWORK_KEY: &str = "1KHLiKZvAvjbY1ziZEHMXawbCEIM6qwjCDm3VYRan/s=";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkKeyError {
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("expected {NETWORK_KEY_SIZE} bytes, got {0}")]
    Length(usize),
}

/// Shared secret separating one network from another.
///
/// Peers holding different network keys fail the very first handshake
/// message and never exchange anything else.
#[derive(Clone, Copy, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct NetworkKey([u8; NETWORK_KEY_SIZE]);

impl NetworkKey {
    pub fn from_bytes(bytes: [u8; NETWORK_KEY_SIZE]) -> Self {
        NetworkKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NETWORK_KEY_SIZE] {
        &self.0
    }
}

impl Default for NetworkKey {
    fn default() -> Self {
        MAIN_NETWORK_KEY
            .parse()
            .expect("main network key constant is valid")
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD.encode(self.0))
    }
}

// never print the key itself
impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NetworkKey(..)")
    }
}

impl FromStr for NetworkKey {
    type Err = NetworkKeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| NetworkKeyError::Base64(e.to_string()))?;
        if bytes.len() != NETWORK_KEY_SIZE {
            return Err(NetworkKeyError::Length(bytes.len()));
        }
        let mut key = [0u8; NETWORK_KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(NetworkKey(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_main_network() {
        let key = NetworkKey::default();
        assert_eq!(key.to_string(), MAIN_NETWORK_KEY);
        assert_eq!(key.as_bytes()[0], 0xd4);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert_eq!(
            "AAAA".parse::<NetworkKey>(),
            Err(NetworkKeyError::Length(3))
        );
    }
}
