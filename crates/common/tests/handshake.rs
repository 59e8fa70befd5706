//! Secret handshake between two in-process parties

mod common;

use ::common::handshake::{self, HandshakeError};
use ::common::network_key::NetworkKey;

#[tokio::test]
async fn test_both_sides_derive_matching_keys() {
    let pair = common::handshake_pair().await;
    let (_, client) = &pair.client;
    let (_, server) = &pair.server;

    assert_eq!(client.remote, pair.server_secret.public());
    assert_eq!(server.remote, pair.client_secret.public());

    assert_eq!(client.keys.encrypt_key, server.keys.decrypt_key);
    assert_eq!(client.keys.encrypt_nonce, server.keys.decrypt_nonce);
    assert_eq!(client.keys.decrypt_key, server.keys.encrypt_key);
    assert_eq!(client.keys.decrypt_nonce, server.keys.encrypt_nonce);
    assert_ne!(client.keys.encrypt_key, client.keys.decrypt_key);
}

#[tokio::test]
async fn test_handshakes_use_fresh_ephemeral_keys() {
    let first = common::handshake_pair().await;
    let second = common::handshake_pair().await;
    assert_ne!(first.client.1.keys.encrypt_key, second.client.1.keys.encrypt_key);
}

#[tokio::test]
async fn test_different_network_keys_fail_at_hello() {
    let client_secret = common::secret();
    let server_secret = common::secret();
    let (mut client_io, mut server_io) = tokio::io::duplex(common::PIPE_CAPACITY);

    let client_network = NetworkKey::default();
    let server_network = NetworkKey::from_bytes([7u8; 32]);
    let server_public = server_secret.public();

    let (client, server) = tokio::join!(
        handshake::client(
            &mut client_io,
            &client_network,
            &client_secret,
            &server_public
        ),
        handshake::server(&mut server_io, &server_network, &server_secret),
    );

    let server_err = server.unwrap_err();
    assert!(matches!(server_err, HandshakeError::InvalidHello));
    assert!(server_err.is_authentication());
    // the server hangs up without answering
    assert!(matches!(client.unwrap_err(), HandshakeError::Io(_)));
}

#[tokio::test]
async fn test_client_dialing_wrong_identity_is_rejected() {
    let network = NetworkKey::default();
    let client_secret = common::secret();
    let server_secret = common::secret();
    let impostor = common::secret();
    let (mut client_io, mut server_io) = tokio::io::duplex(common::PIPE_CAPACITY);

    let impostor_public = impostor.public();

    // the client expects `impostor` but reaches `server_secret`
    let (client, server) = tokio::join!(
        handshake::client(&mut client_io, &network, &client_secret, &impostor_public),
        handshake::server(&mut server_io, &network, &server_secret),
    );

    assert!(matches!(
        server.unwrap_err(),
        HandshakeError::InvalidClientAuth
    ));
    assert!(client.is_err());
}
