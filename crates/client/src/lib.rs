//! Turnwire Client
//!
//! Splices a local UDP listener, a DTLS session and a TURN relay allocation
//! into forwarding pipelines, and supervises N of them with fail-fast
//! teardown.

mod ingress;
mod pipe;
mod pipeline;
mod supervisor;

pub use ingress::{LearnedPeerAddress, LocalIngressBridge};
pub use pipe::{duplex_channel, PacketEndpoint, DEFAULT_CHANNEL_CAPACITY};
pub use supervisor::{TurnProxy, TurnProxyBuilder};

use thiserror::Error;
use turnwire_core::TurnwireError;
use turnwire_dtls::DtlsError;
use turnwire_relay::RelayError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] TurnwireError),

    #[error("Failed to bind listen address: {0}")]
    Bind(String),

    #[error("Failed to resolve peer: {0}")]
    ResolvePeer(String),

    #[error("Proxy is already running")]
    AlreadyRunning,

    #[error("DTLS handshake failed: {0}")]
    Handshake(#[from] DtlsError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Forwarding failed: {0}")]
    Forwarding(String),

    #[error("No local peer address learned yet")]
    NoLearnedPeer,

    #[error("Task panicked: {0}")]
    TaskPanicked(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
