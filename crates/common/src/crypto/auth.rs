//! Keyed message authentication (HMAC-SHA-512 truncated to 256 bits).
//!
//! This is the `crypto_auth` construction: the handshake uses it to prove
//! knowledge of the network key, and to derive the box stream nonces.

use hmac::{Hmac, Mac};
use sha2::Sha512;

/// Size of an authentication tag in bytes
pub const AUTH_TAG_SIZE: usize = 32;

type HmacSha512 = Hmac<Sha512>;

fn mac(key: &[u8], msg: &[u8]) -> HmacSha512 {
    let mut mac = HmacSha512::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(msg);
    mac
}

/// Compute the authentication tag of `msg` under `key`
pub fn auth(key: &[u8], msg: &[u8]) -> [u8; AUTH_TAG_SIZE] {
    let full = mac(key, msg).finalize().into_bytes();
    let mut tag = [0u8; AUTH_TAG_SIZE];
    tag.copy_from_slice(&full[..AUTH_TAG_SIZE]);
    tag
}

/// Constant-time check of a tag produced by [`auth`]
pub fn verify(key: &[u8], msg: &[u8], tag: &[u8]) -> bool {
    tag.len() == AUTH_TAG_SIZE && mac(key, msg).verify_truncated_left(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_verify() {
        let key = [7u8; 32];
        let tag = auth(&key, b"ephemeral");
        assert!(verify(&key, b"ephemeral", &tag));
        assert!(!verify(&key, b"ephemeraL", &tag));
        assert!(!verify(&[8u8; 32], b"ephemeral", &tag));
        assert!(!verify(&key, b"ephemeral", &tag[..16]));
    }
}
