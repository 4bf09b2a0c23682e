//! Turnwire Relay
//!
//! The egress half of a pipeline: fetch credentials, open a TURN session,
//! allocate a relayed address and shuttle packets between the in-process
//! channel and the fixed remote peer.

mod connector;
mod egress;
mod stun_stream;

pub use connector::{resolve_relay_server, RelayAllocation, RelayConnector, TurnConnector};
pub use egress::{EgressSettings, RelayEgressBridge};
pub use stun_stream::StunStreamConn;

use thiserror::Error;
use turnwire_core::TurnwireError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Credential resolution failed: {0}")]
    Credentials(#[from] TurnwireError),

    #[error("Relay address resolution failed: {0}")]
    Resolve(String),

    #[error("Relay socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("Relay session failed: {0}")]
    Session(String),

    #[error("Relay allocation failed: {0}")]
    Allocate(String),

    #[error("Stream framing error: {0}")]
    Framing(String),

    #[error("Relay forwarding failed: {0}")]
    Forwarding(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
