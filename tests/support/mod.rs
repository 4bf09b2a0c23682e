//! In-process stand-ins for the DTLS and TURN libraries

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use turnwire_client::{ClientError, TurnProxy};
use turnwire_core::{EphemeralCredentials, ProxyConfig, SharedConn, TransportMode};
use turnwire_dtls::{DtlsError, SecureConnector};
use turnwire_relay::{RelayAllocation, RelayConnector, RelayError};

pub const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// SECURE CONNECTORS
// =============================================================================

/// Hands the transport back untouched
pub struct PassThroughConnector;

#[async_trait]
impl SecureConnector for PassThroughConnector {
    async fn connect(&self, transport: SharedConn) -> turnwire_dtls::Result<SharedConn> {
        Ok(transport)
    }
}

/// Fails every handshake
pub struct FailingConnector;

#[async_trait]
impl SecureConnector for FailingConnector {
    async fn connect(&self, _transport: SharedConn) -> turnwire_dtls::Result<SharedConn> {
        Err(DtlsError::Handshake("simulated handshake failure".to_string()))
    }
}

/// Passes through, except the `fail_on`-th call (zero based) fails
pub struct FlakyConnector {
    calls: AtomicUsize,
    fail_on: usize,
}

impl FlakyConnector {
    pub fn new(fail_on: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl SecureConnector for FlakyConnector {
    async fn connect(&self, transport: SharedConn) -> turnwire_dtls::Result<SharedConn> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
            return Err(DtlsError::Handshake("simulated handshake failure".to_string()));
        }
        Ok(transport)
    }
}

/// Passes through, except the `panic_on`-th call (zero based) panics
pub struct PanickingConnector {
    calls: AtomicUsize,
    panic_on: usize,
}

impl PanickingConnector {
    pub fn new(panic_on: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            panic_on,
        }
    }
}

#[async_trait]
impl SecureConnector for PanickingConnector {
    async fn connect(&self, transport: SharedConn) -> turnwire_dtls::Result<SharedConn> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.panic_on {
            panic!("simulated handshake panic");
        }
        Ok(transport)
    }
}

// =============================================================================
// RELAY CONNECTORS
// =============================================================================

/// Relays over a plain local UDP socket
pub struct UdpAllocation {
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

/// Allocates a fresh loopback UDP socket per call and counts the calls
#[derive(Default)]
pub struct UdpRelayConnector {
    allocations: AtomicUsize,
    relayed: Mutex<Vec<SocketAddr>>,
}

impl UdpRelayConnector {
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn relayed_addrs(&self) -> Vec<SocketAddr> {
        self.relayed.lock().clone()
    }
}

#[async_trait]
impl RelayConnector for UdpRelayConnector {
    async fn allocate(
        &self,
        _credentials: &EphemeralCredentials,
        _transport: TransportMode,
        _realm: &str,
    ) -> turnwire_relay::Result<Box<dyn RelayAllocation>> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        self.relayed.lock().push(socket.local_addr()?);
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(UdpAllocation {
            socket: Arc::new(socket),
        }))
    }
}

/// Allocates like [`UdpRelayConnector`], except the `fail_on`-th call
/// (zero based) is refused
pub struct FlakyRelayConnector {
    calls: AtomicUsize,
    fail_on: usize,
    inner: UdpRelayConnector,
}

impl FlakyRelayConnector {
    pub fn new(fail_on: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on,
            inner: UdpRelayConnector::default(),
        }
    }

    pub fn allocations(&self) -> usize {
        self.inner.allocations()
    }
}

#[async_trait]
impl RelayConnector for FlakyRelayConnector {
    async fn allocate(
        &self,
        credentials: &EphemeralCredentials,
        transport: TransportMode,
        realm: &str,
    ) -> turnwire_relay::Result<Box<dyn RelayAllocation>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
            return Err(RelayError::Allocate("simulated allocation refusal".to_string()));
        }
        self.inner.allocate(credentials, transport, realm).await
    }
}

/// Hands out one socket bound in advance by the test
pub struct PreboundRelayConnector {
    socket: Mutex<Option<UdpSocket>>,
}

impl PreboundRelayConnector {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket: Mutex::new(Some(socket)),
        }
    }
}

#[async_trait]
impl RelayConnector for PreboundRelayConnector {
    async fn allocate(
        &self,
        _credentials: &EphemeralCredentials,
        _transport: TransportMode,
        _realm: &str,
    ) -> turnwire_relay::Result<Box<dyn RelayAllocation>> {
        let socket = self
            .socket
            .lock()
            .take()
            .ok_or_else(|| RelayError::Allocate("prebound socket already used".to_string()))?;
        Ok(Box::new(UdpAllocation {
            socket: Arc::new(socket),
        }))
    }
}

// =============================================================================
// PROXY HELPERS
// =============================================================================

/// A loopback address that was free a moment ago
pub async fn free_udp_addr() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.local_addr().unwrap()
}

pub fn config(peer: SocketAddr, listen: &str, streams: usize) -> ProxyConfig {
    ProxyConfig::new(peer.to_string(), "test-link", listen).with_streams(streams)
}

/// Run `start()` on its own task
pub fn spawn_start(proxy: &Arc<TurnProxy>) -> JoinHandle<turnwire_client::Result<()>> {
    let proxy = Arc::clone(proxy);
    tokio::spawn(async move { proxy.start().await })
}

/// Wait for `start()` to return
pub async fn join_start(handle: JoinHandle<turnwire_client::Result<()>>) -> Result<(), ClientError> {
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("start() did not return")
        .expect("start() task panicked")
}

/// Poll until `condition` holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Await with the shared deadline
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}
