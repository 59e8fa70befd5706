//! Pure cryptographic steps of the secret handshake.
//!
//! Nothing in here touches I/O, so both sides can be driven against each
//! other in memory. The async drivers in the parent module just shuttle the
//! produced byte arrays across a stream.

use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::crypto::{auth, secret_box, sha256, PublicKey, SecretKey, Signature, SIGNATURE_SIZE};
use crate::network_key::NetworkKey;

use super::HandshakeError;

/// Length of a hello message: auth tag + ephemeral public key
pub const HELLO_SIZE: usize = 64;
/// Length of the boxed client authenticate message
pub const CLIENT_AUTH_SIZE: usize = 112;
/// Length of the boxed server accept message
pub const SERVER_ACCEPT_SIZE: usize = 80;

const ZERO_NONCE: [u8; secret_box::NONCE_SIZE] = [0u8; secret_box::NONCE_SIZE];

/// Directional box stream keys agreed by both sides of a handshake
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub client_to_server_key: [u8; 32],
    pub client_to_server_nonce: [u8; 24],
    pub server_to_client_key: [u8; 32],
    pub server_to_client_nonce: [u8; 24],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

/// Keys as seen from one side of the connection
#[derive(Clone)]
pub struct BoxStreamKeys {
    pub encrypt_key: [u8; 32],
    pub encrypt_nonce: [u8; 24],
    pub decrypt_key: [u8; 32],
    pub decrypt_nonce: [u8; 24],
}

impl std::fmt::Debug for BoxStreamKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxStreamKeys(..)")
    }
}

impl SessionKeys {
    pub fn for_client(&self) -> BoxStreamKeys {
        BoxStreamKeys {
            encrypt_key: self.client_to_server_key,
            encrypt_nonce: self.client_to_server_nonce,
            decrypt_key: self.server_to_client_key,
            decrypt_nonce: self.server_to_client_nonce,
        }
    }

    pub fn for_server(&self) -> BoxStreamKeys {
        BoxStreamKeys {
            encrypt_key: self.server_to_client_key,
            encrypt_nonce: self.server_to_client_nonce,
            decrypt_key: self.client_to_server_key,
            decrypt_nonce: self.client_to_server_nonce,
        }
    }
}

/// Generate a fresh ephemeral curve25519 secret
pub fn ephemeral() -> Result<StaticSecret, HandshakeError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(|e| HandshakeError::Rng(e.to_string()))?;
    Ok(StaticSecret::from(bytes))
}

fn hello(network: &NetworkKey, ephemeral_public: &X25519PublicKey) -> [u8; HELLO_SIZE] {
    let mut msg = [0u8; HELLO_SIZE];
    msg[..32].copy_from_slice(&auth::auth(network.as_bytes(), ephemeral_public.as_bytes()));
    msg[32..].copy_from_slice(ephemeral_public.as_bytes());
    msg
}

fn verify_hello(network: &NetworkKey, msg: &[u8; HELLO_SIZE]) -> Option<X25519PublicKey> {
    let (tag, key) = msg.split_at(32);
    if !auth::verify(network.as_bytes(), key, tag) {
        return None;
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(key);
    Some(X25519PublicKey::from(bytes))
}

fn dh(secret: &StaticSecret, public: &X25519PublicKey) -> Result<[u8; 32], HandshakeError> {
    let shared = secret.diffie_hellman(public);
    if !shared.was_contributory() {
        return Err(HandshakeError::WeakKey);
    }
    Ok(shared.to_bytes())
}

fn nonce_for(network: &NetworkKey, ephemeral_public: &X25519PublicKey) -> [u8; 24] {
    let tag = auth::auth(network.as_bytes(), ephemeral_public.as_bytes());
    let mut nonce = [0u8; 24];
    nonce.copy_from_slice(&tag[..24]);
    nonce
}

/// Material both sides hold once all three shared secrets are known
struct Transcript {
    network: NetworkKey,
    ab: [u8; 32],
    a_big_b: [u8; 32],
    big_a_b: [u8; 32],
}

impl Transcript {
    fn session_keys(
        &self,
        client: &PublicKey,
        server: &PublicKey,
        client_ephemeral: &X25519PublicKey,
        server_ephemeral: &X25519PublicKey,
    ) -> SessionKeys {
        let secret = sha256(&[
            self.network.as_bytes(),
            &self.ab,
            &self.a_big_b,
            &self.big_a_b,
        ]);
        let combined = sha256(&[&secret]);

        SessionKeys {
            client_to_server_key: sha256(&[&combined, server.as_bytes()]),
            client_to_server_nonce: nonce_for(&self.network, server_ephemeral),
            server_to_client_key: sha256(&[&combined, client.as_bytes()]),
            server_to_client_nonce: nonce_for(&self.network, client_ephemeral),
        }
    }
}

fn cat(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

fn client_auth_key(network: &NetworkKey, ab: &[u8; 32], a_big_b: &[u8; 32]) -> [u8; 32] {
    sha256(&[network.as_bytes(), ab, a_big_b])
}

fn server_accept_key(
    network: &NetworkKey,
    ab: &[u8; 32],
    a_big_b: &[u8; 32],
    big_a_b: &[u8; 32],
) -> [u8; 32] {
    sha256(&[network.as_bytes(), ab, a_big_b, big_a_b])
}

/// Initiating side of the handshake
pub struct ClientHandshake {
    network: NetworkKey,
    local: SecretKey,
    server: PublicKey,
    ephemeral: StaticSecret,
    ephemeral_public: X25519PublicKey,
    server_ephemeral: Option<X25519PublicKey>,
    ab: [u8; 32],
    a_big_b: [u8; 32],
    signature: Option<Signature>,
}

impl ClientHandshake {
    pub fn new(
        network: NetworkKey,
        local: SecretKey,
        server: PublicKey,
        ephemeral: StaticSecret,
    ) -> Self {
        let ephemeral_public = X25519PublicKey::from(&ephemeral);
        Self {
            network,
            local,
            server,
            ephemeral,
            ephemeral_public,
            server_ephemeral: None,
            ab: [0u8; 32],
            a_big_b: [0u8; 32],
            signature: None,
        }
    }

    pub fn hello(&self) -> [u8; HELLO_SIZE] {
        hello(&self.network, &self.ephemeral_public)
    }

    pub fn read_server_hello(&mut self, msg: &[u8; HELLO_SIZE]) -> Result<(), HandshakeError> {
        let server_ephemeral =
            verify_hello(&self.network, msg).ok_or(HandshakeError::InvalidHello)?;
        self.ab = dh(&self.ephemeral, &server_ephemeral)?;
        self.a_big_b = dh(&self.ephemeral, &self.server.to_x25519()?)?;
        self.server_ephemeral = Some(server_ephemeral);
        Ok(())
    }

    /// Sign `network || server || sha256(ab)` and box it with our identity
    pub fn client_auth(&mut self) -> [u8; CLIENT_AUTH_SIZE] {
        let signature = self.local.sign(&cat(&[
            self.network.as_bytes(),
            self.server.as_bytes(),
            &sha256(&[&self.ab]),
        ]));

        let mut payload = [0u8; SIGNATURE_SIZE + 32];
        payload[..SIGNATURE_SIZE].copy_from_slice(&signature.to_bytes());
        payload[SIGNATURE_SIZE..].copy_from_slice(self.local.public().as_bytes());
        self.signature = Some(signature);

        let key = client_auth_key(&self.network, &self.ab, &self.a_big_b);
        let boxed = secret_box::seal(&key, &ZERO_NONCE, &payload);
        let mut out = [0u8; CLIENT_AUTH_SIZE];
        out.copy_from_slice(&boxed);
        out
    }

    pub fn read_server_accept(
        self,
        msg: &[u8; SERVER_ACCEPT_SIZE],
    ) -> Result<(PublicKey, SessionKeys), HandshakeError> {
        let server_ephemeral = self
            .server_ephemeral
            .ok_or(HandshakeError::OutOfOrder("server accept before server hello"))?;
        let client_signature = self
            .signature
            .ok_or(HandshakeError::OutOfOrder("server accept before client auth"))?;

        let big_a_b = dh(&self.local.to_x25519(), &server_ephemeral)?;
        let key = server_accept_key(&self.network, &self.ab, &self.a_big_b, &big_a_b);
        let opened = secret_box::open(&key, &ZERO_NONCE, msg)
            .map_err(|_| HandshakeError::InvalidServerAccept)?;
        let signature_bytes: [u8; SIGNATURE_SIZE] = opened
            .as_slice()
            .try_into()
            .map_err(|_| HandshakeError::InvalidServerAccept)?;
        let signature = Signature::from_bytes(&signature_bytes);

        let client = self.local.public();
        let signed = cat(&[
            self.network.as_bytes(),
            &client_signature.to_bytes(),
            client.as_bytes(),
            &sha256(&[&self.ab]),
        ]);
        self.server
            .verify(&signed, &signature)
            .map_err(|_| HandshakeError::InvalidServerAccept)?;

        let transcript = Transcript {
            network: self.network,
            ab: self.ab,
            a_big_b: self.a_big_b,
            big_a_b,
        };
        let keys = transcript.session_keys(
            &client,
            &self.server,
            &self.ephemeral_public,
            &server_ephemeral,
        );
        Ok((self.server, keys))
    }
}

/// Accepting side of the handshake
pub struct ServerHandshake {
    network: NetworkKey,
    local: SecretKey,
    ephemeral: StaticSecret,
    ephemeral_public: X25519PublicKey,
    client_ephemeral: Option<X25519PublicKey>,
    ab: [u8; 32],
    a_big_b: [u8; 32],
    big_a_b: [u8; 32],
    client: Option<(PublicKey, Signature)>,
}

impl ServerHandshake {
    pub fn new(network: NetworkKey, local: SecretKey, ephemeral: StaticSecret) -> Self {
        let ephemeral_public = X25519PublicKey::from(&ephemeral);
        Self {
            network,
            local,
            ephemeral,
            ephemeral_public,
            client_ephemeral: None,
            ab: [0u8; 32],
            a_big_b: [0u8; 32],
            big_a_b: [0u8; 32],
            client: None,
        }
    }

    pub fn read_client_hello(&mut self, msg: &[u8; HELLO_SIZE]) -> Result<(), HandshakeError> {
        let client_ephemeral =
            verify_hello(&self.network, msg).ok_or(HandshakeError::InvalidHello)?;
        self.ab = dh(&self.ephemeral, &client_ephemeral)?;
        self.a_big_b = dh(&self.local.to_x25519(), &client_ephemeral)?;
        self.client_ephemeral = Some(client_ephemeral);
        Ok(())
    }

    pub fn hello(&self) -> [u8; HELLO_SIZE] {
        hello(&self.network, &self.ephemeral_public)
    }

    pub fn read_client_auth(&mut self, msg: &[u8; CLIENT_AUTH_SIZE]) -> Result<(), HandshakeError> {
        if self.client_ephemeral.is_none() {
            return Err(HandshakeError::OutOfOrder("client auth before client hello"));
        }
        let key = client_auth_key(&self.network, &self.ab, &self.a_big_b);
        let opened = secret_box::open(&key, &ZERO_NONCE, msg)
            .map_err(|_| HandshakeError::InvalidClientAuth)?;
        if opened.len() != SIGNATURE_SIZE + 32 {
            return Err(HandshakeError::InvalidClientAuth);
        }

        let mut signature_bytes = [0u8; SIGNATURE_SIZE];
        signature_bytes.copy_from_slice(&opened[..SIGNATURE_SIZE]);
        let signature = Signature::from_bytes(&signature_bytes);
        let client = PublicKey::try_from(&opened[SIGNATURE_SIZE..])
            .map_err(|_| HandshakeError::InvalidClientAuth)?;

        let signed = cat(&[
            self.network.as_bytes(),
            self.local.public().as_bytes(),
            &sha256(&[&self.ab]),
        ]);
        client
            .verify(&signed, &signature)
            .map_err(|_| HandshakeError::InvalidClientAuth)?;

        self.big_a_b = dh(&self.ephemeral, &client.to_x25519()?)?;
        self.client = Some((client, signature));
        Ok(())
    }

    pub fn server_accept(
        self,
    ) -> Result<([u8; SERVER_ACCEPT_SIZE], PublicKey, SessionKeys), HandshakeError> {
        let (client, client_signature) = self
            .client
            .ok_or(HandshakeError::OutOfOrder("server accept before client auth"))?;
        let client_ephemeral = self
            .client_ephemeral
            .ok_or(HandshakeError::OutOfOrder("server accept before client hello"))?;

        let signature = self.local.sign(&cat(&[
            self.network.as_bytes(),
            &client_signature.to_bytes(),
            client.as_bytes(),
            &sha256(&[&self.ab]),
        ]));
        let key = server_accept_key(&self.network, &self.ab, &self.a_big_b, &self.big_a_b);
        let boxed = secret_box::seal(&key, &ZERO_NONCE, &signature.to_bytes());
        let mut out = [0u8; SERVER_ACCEPT_SIZE];
        out.copy_from_slice(&boxed);

        let transcript = Transcript {
            network: self.network,
            ab: self.ab,
            a_big_b: self.a_big_b,
            big_a_b: self.big_a_b,
        };
        let keys = transcript.session_keys(
            &client,
            &self.local.public(),
            &client_ephemeral,
            &self.ephemeral_public,
        );
        Ok((out, client, keys))
    }
}
