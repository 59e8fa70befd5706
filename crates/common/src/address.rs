use std::fmt;
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::crypto::PublicKey;
use crate::ids::FeedId;

/// Only carrier protocol understood by the multiserver address parser
pub const NET_PROTOCOL: &str = "net";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("expected '<protocol>:<host>:<port>~shs:<key>', got '{0}'")]
    Malformed(String),
    #[error("unsupported protocol '{0}'")]
    UnsupportedProtocol(String),
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("invalid shs key: {0}")]
    InvalidKey(String),
}

/// A reachable network location bound to the identity expected there.
///
/// Displays and parses the multiserver form `net:<host>:<port>~shs:<base64 key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Address {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub key: FeedId,
}

impl Address {
    pub fn net(host: impl Into<String>, port: u16, key: FeedId) -> Self {
        Self {
            protocol: NET_PROTOCOL.to_string(),
            host: host.into(),
            port,
            key,
        }
    }

    /// `host:port`, suitable for a socket connect
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}~shs:{}",
            self.protocol,
            self.host,
            self.port,
            self.key.public_key().to_base64()
        )
    }
}

impl FromStr for Address {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (transport, auth) = s
            .split_once('~')
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        let key_b64 = auth
            .strip_prefix("shs:")
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;

        let (protocol, rest) = transport
            .split_once(':')
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        if protocol != NET_PROTOCOL {
            return Err(AddressError::UnsupportedProtocol(protocol.to_string()));
        }
        // rsplit so bracketless ipv6 hosts keep their colons
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(port.to_string()))?;
        let key = PublicKey::from_base64(key_b64)
            .map_err(|e| AddressError::InvalidKey(e.to_string()))?;

        Ok(Address::net(host, port, FeedId::from(key)))
    }
}
