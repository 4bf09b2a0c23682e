//! STUN/TURN over TCP
//!
//! TURN over a stream transport sends STUN messages and ChannelData messages
//! back to back with no extra framing. This adapter recovers message
//! boundaries so the TURN client can treat the connection as a datagram
//! socket bound to the relay server.
//!
//! - STUN message: top two bits of the first byte are `00`, total size is
//!   the 20 byte header plus the length field.
//! - ChannelData: first byte in `0x40..=0x7F`, total size is the 4 byte
//!   header plus the length field, padded to a multiple of 4 on the wire.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;
use webrtc_util::{Conn, Error as ConnError};

use turnwire_core::MAX_PACKET_SIZE;

use crate::RelayError;

const STUN_HEADER_SIZE: usize = 20;
const CHANNEL_DATA_HEADER_SIZE: usize = 4;

/// Size of one message on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameExtent {
    /// Bytes handed to the reader
    pub message_len: usize,
    /// Bytes consumed from the stream, including padding
    pub wire_len: usize,
}

/// Inspect the start of `buf` and work out the size of the next message.
///
/// Returns `Ok(None)` until the 4 byte prefix that carries the length has
/// arrived.
pub(crate) fn frame_extent(buf: &[u8]) -> Result<Option<FrameExtent>, RelayError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;

    match buf[0] & 0xC0 {
        0x00 => {
            let message_len = STUN_HEADER_SIZE + length;
            Ok(Some(FrameExtent {
                message_len,
                wire_len: message_len,
            }))
        }
        0x40 => {
            let message_len = CHANNEL_DATA_HEADER_SIZE + length;
            Ok(Some(FrameExtent {
                message_len,
                wire_len: padded(message_len),
            }))
        }
        _ => Err(RelayError::Framing(format!(
            "unexpected leading byte 0x{:02x}",
            buf[0]
        ))),
    }
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn is_channel_data(message: &[u8]) -> bool {
    message.first().map_or(false, |b| b & 0xC0 == 0x40)
}

struct FrameReader {
    half: OwnedReadHalf,
    buf: BytesMut,
}

impl FrameReader {
    async fn next_frame(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            let extent = frame_extent(&self.buf)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

            if let Some(extent) = extent {
                if self.buf.len() >= extent.wire_len {
                    let n = extent.message_len.min(out.len());
                    out[..n].copy_from_slice(&self.buf[..n]);
                    self.buf.advance(extent.wire_len);
                    return Ok(n);
                }
            }

            if self.half.read_buf(&mut self.buf).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "relay closed the stream",
                ));
            }
        }
    }
}

/// TCP connection to a relay server exposed as a datagram [`Conn`]
pub struct StunStreamConn {
    reader: Mutex<FrameReader>,
    writer: Mutex<OwnedWriteHalf>,
    local_addr: SocketAddr,
    server_addr: SocketAddr,
}

impl StunStreamConn {
    /// Connect to the relay server
    pub async fn connect(server: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(server).await?;
        Self::new(stream)
    }

    /// Wrap an already connected stream
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let server_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: Mutex::new(FrameReader {
                half: read_half,
                buf: BytesMut::with_capacity(MAX_PACKET_SIZE * 2),
            }),
            writer: Mutex::new(write_half),
            local_addr,
            server_addr,
        })
    }

    async fn write_message(&self, message: &[u8]) -> io::Result<usize> {
        let mut writer = self.writer.lock().await;
        writer.write_all(message).await?;
        if is_channel_data(message) {
            let padding = padded(message.len()) - message.len();
            if padding > 0 {
                writer.write_all(&[0u8; 3][..padding]).await?;
            }
        }
        Ok(message.len())
    }
}

#[async_trait]
impl Conn for StunStreamConn {
    async fn connect(&self, _addr: SocketAddr) -> webrtc_util::Result<()> {
        Err(ConnError::Other("stream relay connection is already connected".to_string()))
    }

    async fn recv(&self, buf: &mut [u8]) -> webrtc_util::Result<usize> {
        let mut reader = self.reader.lock().await;
        Ok(reader.next_frame(buf).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> webrtc_util::Result<(usize, SocketAddr)> {
        let n = self.recv(buf).await?;
        Ok((n, self.server_addr))
    }

    async fn send(&self, buf: &[u8]) -> webrtc_util::Result<usize> {
        Ok(self.write_message(buf).await?)
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> webrtc_util::Result<usize> {
        Ok(self.write_message(buf).await?)
    }

    fn local_addr(&self) -> webrtc_util::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.server_addr)
    }

    async fn close(&self) -> webrtc_util::Result<()> {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Relay stream shutdown: {}", e);
        }
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}
