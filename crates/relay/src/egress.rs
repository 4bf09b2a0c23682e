//! Relay egress bridge
//!
//! Owns one relay session for the lifetime of a pipeline. Packets read from
//! the channel endpoint go to the fixed peer through the relayed address;
//! packets arriving on the relayed address go back into the channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use turnwire_core::{
    Conn, CredentialResolver, SharedConn, TransportMode, MAX_PACKET_SIZE,
};

use crate::connector::{RelayAllocation, RelayConnector};
use crate::{RelayError, Result};

/// Per-pipeline relay parameters
#[derive(Debug, Clone)]
pub struct EgressSettings {
    /// Opaque locator handed to the credential resolver
    pub locator: String,
    /// Remote peer every outbound packet is addressed to
    pub peer: SocketAddr,
    pub transport: TransportMode,
    pub realm: String,
}

/// Bridges one packet channel endpoint to a relay allocation
pub struct RelayEgressBridge {
    resolver: Arc<dyn CredentialResolver>,
    connector: Arc<dyn RelayConnector>,
    settings: EgressSettings,
}

impl RelayEgressBridge {
    pub fn new(
        resolver: Arc<dyn CredentialResolver>,
        connector: Arc<dyn RelayConnector>,
        settings: EgressSettings,
    ) -> Self {
        Self {
            resolver,
            connector,
            settings,
        }
    }

    /// Run until cancelled or until either direction fails.
    ///
    /// Returns `Ok(())` when `cancel` fires. On return the allocation is
    /// released, `cancel` is triggered and `endpoint` is closed.
    pub async fn run(&self, endpoint: SharedConn, cancel: CancellationToken) -> Result<()> {
        let _guard = cancel.clone().drop_guard();

        let result = self.setup_and_forward(&endpoint, &cancel).await;

        if let Err(e) = endpoint.close().await {
            debug!("Channel endpoint close: {}", e);
        }
        result
    }

    async fn setup_and_forward(&self, endpoint: &SharedConn, cancel: &CancellationToken) -> Result<()> {
        let credentials = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            creds = self.resolver.resolve(&self.settings.locator) => creds?,
        };
        debug!("Resolved relay credentials for {}", credentials.username);

        let allocation = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            alloc = self.connector.allocate(
                &credentials,
                self.settings.transport,
                &self.settings.realm,
            ) => alloc?,
        };

        if let Some(addr) = allocation.relayed_addr() {
            debug!("Relay egress to {} via {}", self.settings.peer, addr);
        }

        let result = self.forward(endpoint, &*allocation, cancel).await;
        allocation.close().await;
        result
    }

    async fn forward(
        &self,
        endpoint: &SharedConn,
        allocation: &dyn RelayAllocation,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let relay = allocation.conn();

        let outbound = tokio::spawn(relay_outbound(
            Arc::clone(endpoint),
            Arc::clone(&relay),
            self.settings.peer,
            cancel.clone(),
        ));
        let inbound = tokio::spawn(relay_inbound(
            Arc::clone(endpoint),
            relay,
            cancel.clone(),
        ));

        let (outbound, inbound) = tokio::join!(outbound, inbound);
        let outbound = outbound.map_err(|e| RelayError::Forwarding(e.to_string()))?;
        let inbound = inbound.map_err(|e| RelayError::Forwarding(e.to_string()))?;
        outbound.and(inbound)
    }
}

/// Channel endpoint → relay → peer
async fn relay_outbound(
    endpoint: SharedConn,
    relay: SharedConn,
    peer: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = cancel.clone().drop_guard();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            read = endpoint.recv(&mut buf) => read.map_err(|e| {
                RelayError::Forwarding(format!("channel read: {}", e))
            })?,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            sent = relay.send_to(&buf[..n], peer) => {
                if let Err(e) = sent {
                    warn!("Relay write to {} failed: {}", peer, e);
                    return Err(RelayError::Forwarding(format!("relay write: {}", e)));
                }
            }
        }
    }
}

/// Relay → channel endpoint. The sender address is not checked.
async fn relay_inbound(
    endpoint: SharedConn,
    relay: SharedConn,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = cancel.clone().drop_guard();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            read = relay.recv_from(&mut buf) => match read {
                Ok((n, _from)) => n,
                Err(e) => return Err(RelayError::Forwarding(format!("relay read: {}", e))),
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            sent = endpoint.send(&buf[..n]) => {
                sent.map_err(|e| RelayError::Forwarding(format!("channel write: {}", e)))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use turnwire_core::{EphemeralCredentials, StaticCredentialResolver, TurnwireError};

    // ==================== Helpers ====================

    /// Allocation that relays over a plain local UDP socket
    struct UdpAllocation {
        socket: Arc<UdpSocket>,
    }

    #[async_trait]
    impl RelayAllocation for UdpAllocation {
        fn relayed_addr(&self) -> Option<SocketAddr> {
            self.socket.local_addr().ok()
        }

        fn conn(&self) -> SharedConn {
            self.socket.clone()
        }

        async fn close(&self) {}
    }

    struct UdpConnector;

    #[async_trait]
    impl RelayConnector for UdpConnector {
        async fn allocate(
            &self,
            _credentials: &EphemeralCredentials,
            _transport: TransportMode,
            _realm: &str,
        ) -> Result<Box<dyn RelayAllocation>> {
            let socket = UdpSocket::bind("127.0.0.1:0").await?;
            Ok(Box::new(UdpAllocation {
                socket: Arc::new(socket),
            }))
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl RelayConnector for RefusingConnector {
        async fn allocate(
            &self,
            _credentials: &EphemeralCredentials,
            _transport: TransportMode,
            _realm: &str,
        ) -> Result<Box<dyn RelayAllocation>> {
            Err(RelayError::Allocate("quota exceeded".to_string()))
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl CredentialResolver for FailingResolver {
        async fn resolve(&self, locator: &str) -> turnwire_core::Result<EphemeralCredentials> {
            Err(TurnwireError::CredentialsUnavailable(locator.to_string()))
        }
    }

    struct PendingResolver;

    #[async_trait]
    impl CredentialResolver for PendingResolver {
        async fn resolve(&self, _locator: &str) -> turnwire_core::Result<EphemeralCredentials> {
            std::future::pending().await
        }
    }

    async fn connected_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        (a, b)
    }

    fn settings(peer: SocketAddr) -> EgressSettings {
        EgressSettings {
            locator: "link-1".to_string(),
            peer,
            transport: TransportMode::Datagram,
            realm: "my-realm".to_string(),
        }
    }

    fn bridge(
        resolver: Arc<dyn CredentialResolver>,
        connector: Arc<dyn RelayConnector>,
        peer: SocketAddr,
    ) -> Arc<RelayEgressBridge> {
        Arc::new(RelayEgressBridge::new(resolver, connector, settings(peer)))
    }

    // ==================== Tests ====================

    #[tokio::test]
    async fn test_forwards_both_directions_until_cancelled() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (endpoint, channel_side) = connected_pair().await;
        let cancel = CancellationToken::new();

        let bridge = bridge(
            Arc::new(StaticCredentialResolver::default()),
            Arc::new(UdpConnector),
            peer.local_addr().unwrap(),
        );
        let task = {
            let bridge = Arc::clone(&bridge);
            let cancel = cancel.clone();
            tokio::spawn(async move { bridge.run(Arc::new(endpoint), cancel).await })
        };

        // Outbound reaches the peer once the allocation is up.
        let mut buf = [0u8; 64];
        let (n, relayed) = loop {
            channel_side.send(b"hello").await.unwrap();
            match tokio::time::timeout(Duration::from_millis(100), peer.recv_from(&mut buf)).await {
                Ok(received) => break received.unwrap(),
                Err(_) => continue,
            }
        };
        assert_eq!(&buf[..n], b"hello");

        // Inbound from the relayed address lands on the channel.
        peer.send_to(b"world", relayed).await.unwrap();
        let n = tokio::time::timeout(Duration::from_secs(2), channel_side.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"world");

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_allocation_failure_is_fatal() {
        let (endpoint, _channel_side) = connected_pair().await;
        let cancel = CancellationToken::new();

        let bridge = bridge(
            Arc::new(StaticCredentialResolver::default()),
            Arc::new(RefusingConnector),
            "127.0.0.1:9".parse().unwrap(),
        );
        let err = bridge.run(Arc::new(endpoint), cancel.clone()).await.unwrap_err();

        assert!(matches!(err, RelayError::Allocate(_)));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_credential_failure_is_fatal() {
        let (endpoint, _channel_side) = connected_pair().await;

        let bridge = bridge(
            Arc::new(FailingResolver),
            Arc::new(UdpConnector),
            "127.0.0.1:9".parse().unwrap(),
        );
        let err = bridge
            .run(Arc::new(endpoint), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Credentials(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_setup_returns_ok() {
        let (endpoint, _channel_side) = connected_pair().await;
        let cancel = CancellationToken::new();

        let bridge = bridge(
            Arc::new(PendingResolver),
            Arc::new(UdpConnector),
            "127.0.0.1:9".parse().unwrap(),
        );
        let task = {
            let bridge = Arc::clone(&bridge);
            let cancel = cancel.clone();
            tokio::spawn(async move { bridge.run(Arc::new(endpoint), cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    /// Collects formatted log output
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut buf) = self.0.lock() {
                buf.extend_from_slice(data);
            }
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bridge_leaves_relayed_address_to_connector_log() {
        let captured = Captured::default();
        let subscriber = {
            let captured = captured.clone();
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_ansi(false)
                .with_writer(move || captured.clone())
                .finish()
        };
        let _default = tracing::subscriber::set_default(subscriber);

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (endpoint, channel_side) = connected_pair().await;
        let cancel = CancellationToken::new();
        let bridge = bridge(
            Arc::new(StaticCredentialResolver::default()),
            Arc::new(UdpConnector),
            peer.local_addr().unwrap(),
        );
        let task = {
            let bridge = Arc::clone(&bridge);
            let cancel = cancel.clone();
            tokio::spawn(async move { bridge.run(Arc::new(endpoint), cancel).await })
        };

        let mut buf = [0u8; 64];
        loop {
            channel_side.send(b"hello").await.unwrap();
            let received =
                tokio::time::timeout(Duration::from_millis(100), peer.recv_from(&mut buf)).await;
            if received.is_ok() {
                break;
            }
        }
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(!output.contains("INFO"), "unexpected info output: {}", output);
    }
}
