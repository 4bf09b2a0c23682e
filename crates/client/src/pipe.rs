//! In-process duplex packet channel
//!
//! Two connected endpoints with no addressing. Each direction is a bounded
//! queue; a single shared token marks the pair closed, so closing either
//! endpoint wakes every blocked reader and writer on both sides.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use webrtc_util::{Conn, Error as ConnError};

use turnwire_core::unspecified_addr;

/// Packets buffered per direction before writers wait
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Create a connected pair of endpoints.
///
/// Writes to one endpoint are read, in order, from the other.
pub fn duplex_channel(capacity: usize) -> (PacketEndpoint, PacketEndpoint) {
    let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();

    let a = PacketEndpoint {
        tx: a_tx,
        rx: Mutex::new(a_rx),
        closed: closed.clone(),
    };
    let b = PacketEndpoint {
        tx: b_tx,
        rx: Mutex::new(b_rx),
        closed,
    };
    (a, b)
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "packet channel closed")
}

/// One side of a [`duplex_channel`]
pub struct PacketEndpoint {
    tx: mpsc::Sender<Bytes>,
    rx: Mutex<mpsc::Receiver<Bytes>>,
    closed: CancellationToken,
}

impl PacketEndpoint {
    /// Queue one packet for the other endpoint
    pub async fn send_packet(&self, data: &[u8]) -> io::Result<usize> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        let packet = Bytes::copy_from_slice(data);

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            sent = self.tx.send(packet) => match sent {
                Ok(()) => Ok(data.len()),
                Err(_) => Err(closed_error()),
            },
        }
    }

    /// Wait for the next packet.
    ///
    /// A packet larger than `buf` is truncated; the rest is dropped.
    pub async fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock().await;

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            packet = rx.recv() => match packet {
                Some(packet) => {
                    let n = packet.len().min(buf.len());
                    buf[..n].copy_from_slice(&packet[..n]);
                    Ok(n)
                }
                None => Err(closed_error()),
            },
        }
    }

    /// Close both endpoints. Idempotent.
    pub fn shutdown(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Conn for PacketEndpoint {
    async fn connect(&self, _addr: SocketAddr) -> webrtc_util::Result<()> {
        Err(ConnError::Other("packet channel has no addresses".to_string()))
    }

    async fn recv(&self, buf: &mut [u8]) -> webrtc_util::Result<usize> {
        Ok(self.recv_packet(buf).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> webrtc_util::Result<(usize, SocketAddr)> {
        let n = self.recv_packet(buf).await?;
        Ok((n, unspecified_addr()))
    }

    async fn send(&self, buf: &[u8]) -> webrtc_util::Result<usize> {
        Ok(self.send_packet(buf).await?)
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> webrtc_util::Result<usize> {
        Ok(self.send_packet(buf).await?)
    }

    fn local_addr(&self) -> webrtc_util::Result<SocketAddr> {
        Ok(unspecified_addr())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(unspecified_addr())
    }

    async fn close(&self) -> webrtc_util::Result<()> {
        self.shutdown();
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}
