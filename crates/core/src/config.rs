//! Proxy configuration

use serde::{Deserialize, Serialize};

use crate::{Result, TurnwireError};

/// Default local listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9000";

/// Default realm presented to the relay service
pub const DEFAULT_REALM: &str = "my-realm";

/// Configuration for one proxy instance.
///
/// Built once and handed to the supervisor, which owns it for the lifetime
/// of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Remote peer address (host:port) that relayed traffic is sent to
    pub peer: String,

    /// Credential locator handed to the credential resolver
    #[serde(default)]
    pub link: String,

    /// Local UDP listen address (host:port)
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Number of concurrent pipelines
    #[serde(default = "default_streams")]
    pub streams: usize,

    /// Socket type used to reach the relay service
    #[serde(default)]
    pub transport: TransportMode,

    /// Realm presented to the relay service
    #[serde(default = "default_realm")]
    pub realm: String,
}

fn default_listen() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_streams() -> usize {
    1
}

fn default_realm() -> String {
    DEFAULT_REALM.to_string()
}

impl ProxyConfig {
    /// Create a configuration with default fan-out, transport and realm
    pub fn new(peer: impl Into<String>, link: impl Into<String>, listen: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            link: link.into(),
            listen: listen.into(),
            streams: default_streams(),
            transport: TransportMode::default(),
            realm: default_realm(),
        }
    }

    /// Set the number of concurrent pipelines
    pub fn with_streams(mut self, streams: usize) -> Self {
        self.streams = streams;
        self
    }

    /// Set the relay transport mode
    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }

    /// Set the relay realm
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Check the fields that would otherwise fail deep inside a pipeline
    pub fn validate(&self) -> Result<()> {
        if self.peer.trim().is_empty() {
            return Err(TurnwireError::InvalidConfig("peer address is empty".to_string()));
        }
        if self.listen.trim().is_empty() {
            return Err(TurnwireError::InvalidConfig("listen address is empty".to_string()));
        }
        if self.streams == 0 {
            return Err(TurnwireError::InvalidConfig(
                "streams must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Socket type for the relay leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// UDP socket to the relay service
    #[default]
    Datagram,
    /// TCP connection with STUN stream framing
    Stream,
}

impl TransportMode {
    /// Pick a mode from the "use UDP" flag exposed to frontends
    pub fn from_udp(udp: bool) -> Self {
        if udp {
            Self::Datagram
        } else {
            Self::Stream
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Datagram => write!(f, "udp"),
            Self::Stream => write!(f, "tcp"),
        }
    }
}
