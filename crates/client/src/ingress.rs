//! Local ingress bridge
//!
//! Connects the shared UDP listening socket to one pipeline's encrypted
//! channel. Return traffic goes to whoever sent the most recent datagram.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use turnwire_core::{Conn, SharedConn, MAX_PACKET_SIZE};

use crate::{ClientError, Result};

/// Most recent sender seen on the local socket (last write wins)
#[derive(Debug, Default)]
pub struct LearnedPeerAddress {
    slot: Mutex<Option<SocketAddr>>,
}

impl LearnedPeerAddress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot, logging when the sender changes
    pub fn record(&self, addr: SocketAddr) {
        let mut slot = self.slot.lock();
        if *slot != Some(addr) {
            debug!("Local peer is now {}", addr);
        }
        *slot = Some(addr);
    }

    pub fn get(&self) -> Option<SocketAddr> {
        *self.slot.lock()
    }
}

/// Forwards between the local UDP socket and an encrypted channel
pub struct LocalIngressBridge {
    socket: Arc<UdpSocket>,
    learned: Arc<LearnedPeerAddress>,
}

impl LocalIngressBridge {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            learned: Arc::new(LearnedPeerAddress::new()),
        }
    }

    /// Address return traffic is currently sent to
    pub fn learned_peer(&self) -> Option<SocketAddr> {
        self.learned.get()
    }

    /// Run uplink and downlink until cancelled or until either fails.
    ///
    /// Either loop ending cancels `cancel`, which stops the other. The
    /// secure channel is closed on return.
    pub async fn run(&self, secure: SharedConn, cancel: CancellationToken) -> Result<()> {
        let uplink = tokio::spawn(uplink(
            Arc::clone(&self.socket),
            Arc::clone(&secure),
            Arc::clone(&self.learned),
            cancel.clone(),
        ));
        let downlink = tokio::spawn(downlink(
            Arc::clone(&self.socket),
            Arc::clone(&secure),
            Arc::clone(&self.learned),
            cancel.clone(),
        ));

        let (uplink, downlink) = tokio::join!(uplink, downlink);

        if let Err(e) = secure.close().await {
            debug!("Secure channel close: {}", e);
        }

        let uplink = uplink.map_err(|e| ClientError::TaskPanicked(e.to_string()))?;
        let downlink = downlink.map_err(|e| ClientError::TaskPanicked(e.to_string()))?;
        uplink.and(downlink)
    }
}

/// Local socket → encrypted channel
async fn uplink(
    socket: Arc<UdpSocket>,
    secure: SharedConn,
    learned: Arc<LearnedPeerAddress>,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = cancel.clone().drop_guard();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let (n, from) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            read = socket.recv_from(&mut buf) => read.map_err(|e| {
                ClientError::Forwarding(format!("local read: {}", e))
            })?,
        };
        learned.record(from);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            sent = secure.send(&buf[..n]) => {
                sent.map_err(|e| ClientError::Forwarding(format!("secure write: {}", e)))?;
            }
        }
    }
}

/// Encrypted channel → learned local peer
async fn downlink(
    socket: Arc<UdpSocket>,
    secure: SharedConn,
    learned: Arc<LearnedPeerAddress>,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = cancel.clone().drop_guard();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            read = secure.recv(&mut buf) => read.map_err(|e| {
                ClientError::Forwarding(format!("secure read: {}", e))
            })?,
        };

        let Some(peer) = learned.get() else {
            warn!("Dropping {} byte reply: no local peer yet", n);
            return Err(ClientError::NoLearnedPeer);
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            sent = socket.send_to(&buf[..n], peer) => {
                sent.map_err(|e| ClientError::Forwarding(format!("local write: {}", e)))?;
            }
        }
    }
}
