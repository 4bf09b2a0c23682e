//! End-to-end test with a real DTLS session
//!
//! local client -> proxy (DTLS client) -> packet channel -> relay egress
//! (plain UDP stand-in for TURN) -> remote peer running a DTLS server.

mod support;

use std::sync::Arc;

use tokio::net::UdpSocket;
use webrtc_dtls::cipher_suite::CipherSuiteId;
use webrtc_dtls::config::{Config, ExtendedMasterSecretType};
use webrtc_dtls::conn::DTLSConn;
use webrtc_dtls::crypto::Certificate;

use turnwire_client::TurnProxy;
use turnwire_core::{Conn, PipelineState};

use support::*;

fn server_config() -> Config {
    Config {
        certificates: vec![Certificate::generate_self_signed(vec!["peer".to_owned()]).unwrap()],
        extended_master_secret: ExtendedMasterSecretType::Require,
        cipher_suites: vec![CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_128_Gcm_Sha256],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_datagrams_cross_dtls_over_relay() {
    // The peer only talks to the relayed address, so bind both up front.
    let relay_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer_socket.local_addr().unwrap();
    peer_socket
        .connect(relay_socket.local_addr().unwrap())
        .await
        .unwrap();

    let server = tokio::spawn(async move {
        DTLSConn::new(Arc::new(peer_socket), server_config(), false, None).await
    });

    let proxy = Arc::new(
        TurnProxy::builder(config(peer_addr, "127.0.0.1:0", 1))
            .with_relay_connector(Arc::new(PreboundRelayConnector::new(relay_socket)))
            .build(),
    );
    let run = spawn_start(&proxy);

    let server = within(server)
        .await
        .unwrap()
        .expect("server handshake failed");
    wait_until(|| {
        proxy
            .pipeline_states()
            .iter()
            .all(|(_, s)| *s == PipelineState::Forwarding)
    })
    .await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(proxy.local_addr().unwrap()).await.unwrap();
    let mut buf = [0u8; 256];

    client.send(b"ping").await.unwrap();
    let n = within(server.recv(&mut buf)).await.unwrap();
    assert_eq!(&buf[..n], b"ping");

    server.send(b"pong").await.unwrap();
    let n = within(client.recv(&mut buf)).await.unwrap();
    assert_eq!(&buf[..n], b"pong");

    proxy.stop().await;
    assert!(join_start(run).await.is_ok());
    let _ = server.close().await;
}
