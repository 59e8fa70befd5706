//! Authenticated symmetric encryption (XSalsa20-Poly1305 secretbox).
//!
//! Wire layout matches NaCl `crypto_secretbox_easy`: the 16-byte MAC is
//! placed in front of the ciphertext. The detached variants are used by the
//! box stream, which carries the body MAC inside the encrypted header.

use xsalsa20poly1305::aead::generic_array::GenericArray;
use xsalsa20poly1305::aead::{AeadInPlace, KeyInit};
use xsalsa20poly1305::XSalsa20Poly1305;

/// Size of a secretbox key in bytes
pub const KEY_SIZE: usize = 32;
/// Size of a secretbox nonce in bytes
pub const NONCE_SIZE: usize = 24;
/// Size of the Poly1305 MAC in bytes
pub const MAC_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
#[error("secretbox authentication failed")]
pub struct OpenError;

fn cipher(key: &[u8; KEY_SIZE]) -> XSalsa20Poly1305 {
    XSalsa20Poly1305::new(GenericArray::from_slice(key))
}

/// Encrypt `buf` in place, returning the detached MAC
pub fn seal_detached(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    buf: &mut [u8],
) -> [u8; MAC_SIZE] {
    let tag = cipher(key)
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", buf)
        .expect("secretbox encryption has no failure mode for in-memory buffers");
    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&tag);
    out
}

/// Decrypt `buf` in place, checking it against a detached MAC
pub fn open_detached(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    buf: &mut [u8],
    mac: &[u8; MAC_SIZE],
) -> Result<(), OpenError> {
    cipher(key)
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            buf,
            GenericArray::from_slice(mac),
        )
        .map_err(|_| OpenError)
}

/// Encrypt `plaintext`, returning `mac || ciphertext`
pub fn seal(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; MAC_SIZE + plaintext.len()];
    out[MAC_SIZE..].copy_from_slice(plaintext);
    let mac = seal_detached(key, nonce, &mut out[MAC_SIZE..]);
    out[..MAC_SIZE].copy_from_slice(&mac);
    out
}

/// Decrypt `mac || ciphertext`, returning the plaintext
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    boxed: &[u8],
) -> Result<Vec<u8>, OpenError> {
    if boxed.len() < MAC_SIZE {
        return Err(OpenError);
    }
    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&boxed[..MAC_SIZE]);
    let mut out = boxed[MAC_SIZE..].to_vec();
    open_detached(key, nonce, &mut out, &mac)?;
    Ok(out)
}

/// Increment a nonce as a big-endian integer, wrapping on overflow
pub fn increment_nonce(nonce: &mut [u8; NONCE_SIZE]) {
    for byte in nonce.iter_mut().rev() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            break;
        }
    }
}
