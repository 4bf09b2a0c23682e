//! Datagram connection seam
//!
//! Every leg of a pipeline speaks the `webrtc-util` [`Conn`] contract: the
//! packet channel endpoints, the DTLS session and the relay allocation.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

pub use webrtc_util::Conn;

/// Shared handle to a datagram connection
pub type SharedConn = Arc<dyn Conn + Send + Sync>;

/// Placeholder address reported by connections that have none
pub fn unspecified_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
}

/// Buffer size for one datagram or secure record on any leg.
///
/// Leaves headroom above a 1500 byte path MTU for DTLS and TURN overhead.
pub const MAX_PACKET_SIZE: usize = 1600;
