use crate::crypto::secret_box::{self, KEY_SIZE, MAC_SIZE, NONCE_SIZE};

use super::BoxStreamError;

/// Largest body a single frame may carry
pub const MAX_BODY_SIZE: usize = 4096;
/// Plaintext header: body length (u16 BE) followed by the body MAC
pub const HEADER_PLAINTEXT_SIZE: usize = 2 + MAC_SIZE;
/// Boxed header as it appears on the wire
pub const HEADER_SIZE: usize = HEADER_PLAINTEXT_SIZE + MAC_SIZE;

const GOODBYE: [u8; HEADER_PLAINTEXT_SIZE] = [0u8; HEADER_PLAINTEXT_SIZE];

/// Decrypted frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    Body { len: usize, mac: [u8; MAC_SIZE] },
    Goodbye,
}

/// Outbound half of the frame cipher: one key and a nonce that advances
/// twice per frame
pub struct FrameSealer {
    key: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
}

impl FrameSealer {
    pub fn new(key: [u8; KEY_SIZE], nonce: [u8; NONCE_SIZE]) -> Self {
        Self { key, nonce }
    }

    /// Encrypt one body into `header || body` wire bytes
    pub fn seal(&mut self, body: &[u8]) -> Result<Vec<u8>, BoxStreamError> {
        if body.len() > MAX_BODY_SIZE {
            return Err(BoxStreamError::BodyTooLong(body.len()));
        }

        let header_nonce = self.nonce;
        secret_box::increment_nonce(&mut self.nonce);
        let body_nonce = self.nonce;
        secret_box::increment_nonce(&mut self.nonce);

        let mut out = vec![0u8; HEADER_SIZE + body.len()];
        out[HEADER_SIZE..].copy_from_slice(body);
        let body_mac = secret_box::seal_detached(&self.key, &body_nonce, &mut out[HEADER_SIZE..]);

        let mut header = [0u8; HEADER_PLAINTEXT_SIZE];
        header[..2].copy_from_slice(&(body.len() as u16).to_be_bytes());
        header[2..].copy_from_slice(&body_mac);
        let boxed_header = secret_box::seal(&self.key, &header_nonce, &header);
        out[..HEADER_SIZE].copy_from_slice(&boxed_header);
        Ok(out)
    }

    /// The goodbye frame: an all-zero header with no body
    pub fn goodbye(&mut self) -> [u8; HEADER_SIZE] {
        let boxed = secret_box::seal(&self.key, &self.nonce, &GOODBYE);
        secret_box::increment_nonce(&mut self.nonce);
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&boxed);
        out
    }
}

/// Inbound half of the frame cipher
pub struct FrameOpener {
    key: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
}

impl FrameOpener {
    pub fn new(key: [u8; KEY_SIZE], nonce: [u8; NONCE_SIZE]) -> Self {
        Self { key, nonce }
    }

    pub fn open_header(&mut self, boxed: &[u8; HEADER_SIZE]) -> Result<FrameHeader, BoxStreamError> {
        let header =
            secret_box::open(&self.key, &self.nonce, boxed).map_err(|_| BoxStreamError::Decrypt)?;
        secret_box::increment_nonce(&mut self.nonce);

        if header.as_slice() == GOODBYE.as_slice() {
            return Ok(FrameHeader::Goodbye);
        }

        let len = u16::from_be_bytes([header[0], header[1]]) as usize;
        if len > MAX_BODY_SIZE {
            return Err(BoxStreamError::BodyTooLong(len));
        }
        let mut mac = [0u8; MAC_SIZE];
        mac.copy_from_slice(&header[2..]);
        Ok(FrameHeader::Body { len, mac })
    }

    /// Decrypt a body in place using the MAC carried by its header
    pub fn open_body(&mut self, mac: &[u8; MAC_SIZE], body: &mut [u8]) -> Result<(), BoxStreamError> {
        secret_box::open_detached(&self.key, &self.nonce, body, mac)
            .map_err(|_| BoxStreamError::Decrypt)?;
        secret_box::increment_nonce(&mut self.nonce);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (FrameSealer, FrameOpener) {
        let key = [7u8; KEY_SIZE];
        let nonce = [0xffu8; NONCE_SIZE];
        (FrameSealer::new(key, nonce), FrameOpener::new(key, nonce))
    }

    fn open(opener: &mut FrameOpener, wire: &[u8]) -> Result<Option<Vec<u8>>, BoxStreamError> {
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&wire[..HEADER_SIZE]);
        match opener.open_header(&header)? {
            FrameHeader::Goodbye => Ok(None),
            FrameHeader::Body { len, mac } => {
                let mut body = wire[HEADER_SIZE..HEADER_SIZE + len].to_vec();
                opener.open_body(&mac, &mut body)?;
                Ok(Some(body))
            }
        }
    }

    #[test]
    fn test_frames_open_in_order() {
        let (mut sealer, mut opener) = pair();
        for body in [&b"first"[..], b"", b"third frame"] {
            let wire = sealer.seal(body).unwrap();
            assert_eq!(wire.len(), HEADER_SIZE + body.len());
            assert_eq!(open(&mut opener, &wire).unwrap().unwrap(), body);
        }
    }

    #[test]
    fn test_goodbye_detected() {
        let (mut sealer, mut opener) = pair();
        let wire = sealer.seal(b"hi").unwrap();
        open(&mut opener, &wire).unwrap();
        let bye = sealer.goodbye();
        assert_eq!(open(&mut opener, &bye).unwrap(), None);
    }

    #[test]
    fn test_body_too_long() {
        let (mut sealer, _) = pair();
        assert!(matches!(
            sealer.seal(&[0u8; MAX_BODY_SIZE + 1]),
            Err(BoxStreamError::BodyTooLong(_))
        ));
        assert!(sealer.seal(&[0u8; MAX_BODY_SIZE]).is_ok());
    }

    #[test]
    fn test_tampered_bit_fails() {
        let (mut sealer, _) = pair();
        let wire = sealer.seal(b"tamper with me").unwrap();
        for i in [0, HEADER_SIZE - 1, HEADER_SIZE, wire.len() - 1] {
            let mut bad = wire.clone();
            bad[i] ^= 0x01;
            let (_, mut opener) = pair();
            assert!(matches!(open(&mut opener, &bad), Err(BoxStreamError::Decrypt)));
        }
    }

    #[test]
    fn test_replayed_frame_fails() {
        let (mut sealer, mut opener) = pair();
        let wire = sealer.seal(b"once").unwrap();
        open(&mut opener, &wire).unwrap();
        assert!(matches!(open(&mut opener, &wire), Err(BoxStreamError::Decrypt)));
    }
}
