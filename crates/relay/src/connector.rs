//! TURN session setup
//!
//! A [`RelayConnector`] turns one set of credentials into a live relay
//! allocation. The production implementation drives the `turn` crate over a
//! fresh UDP socket or a framed TCP connection.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info};
use turn::client::{Client, ClientConfig};

use turnwire_core::{Conn, EphemeralCredentials, SharedConn, TransportMode};

use crate::stun_stream::StunStreamConn;
use crate::{RelayError, Result};

/// A relayed transport address owned by one egress bridge
#[async_trait]
pub trait RelayAllocation: Send + Sync {
    /// Address the relay service allocated on our behalf
    fn relayed_addr(&self) -> Option<SocketAddr>;

    /// Connection whose `send_to`/`recv_from` go through the relay
    fn conn(&self) -> SharedConn;

    /// Release the allocation, the session and the local socket
    async fn close(&self);
}

/// Opens relay sessions. Never retries; every failure is terminal.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn allocate(
        &self,
        credentials: &EphemeralCredentials,
        transport: TransportMode,
        realm: &str,
    ) -> Result<Box<dyn RelayAllocation>>;
}

/// Resolve the relay service address carried by a credential triple
pub async fn resolve_relay_server(credentials: &EphemeralCredentials) -> Result<SocketAddr> {
    let host_port = credentials.server_host_port()?;
    tokio::net::lookup_host(host_port)
        .await
        .map_err(|e| RelayError::Resolve(format!("{}: {}", host_port, e)))?
        .next()
        .ok_or_else(|| RelayError::Resolve(format!("{}: no addresses", host_port)))
}

/// [`RelayConnector`] backed by the `turn` crate client
#[derive(Debug, Clone, Default)]
pub struct TurnConnector;

impl TurnConnector {
    pub fn new() -> Self {
        Self
    }

    async fn open_socket(server: SocketAddr, transport: TransportMode) -> Result<SharedConn> {
        let socket: SharedConn = match transport {
            TransportMode::Datagram => {
                let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                Arc::new(UdpSocket::bind(bind_addr).await?)
            }
            TransportMode::Stream => Arc::new(StunStreamConn::connect(server).await?),
        };
        Ok(socket)
    }
}

#[async_trait]
impl RelayConnector for TurnConnector {
    async fn allocate(
        &self,
        credentials: &EphemeralCredentials,
        transport: TransportMode,
        realm: &str,
    ) -> Result<Box<dyn RelayAllocation>> {
        let server = resolve_relay_server(credentials).await?;
        debug!("Opening {} relay session with {}", transport, server);

        let socket = Self::open_socket(server, transport).await?;

        let config = ClientConfig {
            stun_serv_addr: server.to_string(),
            turn_serv_addr: server.to_string(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            realm: realm.to_string(),
            software: String::new(),
            rto_in_ms: 0,
            conn: Arc::clone(&socket),
            vnet: None,
        };

        let client = match Client::new(config).await {
            Ok(client) => client,
            Err(e) => {
                let _ = socket.close().await;
                return Err(RelayError::Session(e.to_string()));
            }
        };

        if let Err(e) = client.listen().await {
            let _ = client.close().await;
            let _ = socket.close().await;
            return Err(RelayError::Session(e.to_string()));
        }

        let relay_conn: SharedConn = match client.allocate().await {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                let _ = client.close().await;
                let _ = socket.close().await;
                return Err(RelayError::Allocate(e.to_string()));
            }
        };

        let relayed_addr = relay_conn.local_addr().ok();
        if let Some(addr) = relayed_addr {
            info!("relayed-address={}", addr);
        }

        Ok(Box::new(TurnAllocation {
            client,
            relay_conn,
            socket,
            relayed_addr,
        }))
    }
}

struct TurnAllocation {
    client: Client,
    relay_conn: SharedConn,
    socket: SharedConn,
    relayed_addr: Option<SocketAddr>,
}

#[async_trait]
impl RelayAllocation for TurnAllocation {
    fn relayed_addr(&self) -> Option<SocketAddr> {
        self.relayed_addr
    }

    fn conn(&self) -> SharedConn {
        Arc::clone(&self.relay_conn)
    }

    async fn close(&self) {
        if let Err(e) = self.relay_conn.close().await {
            debug!("Relay allocation close: {}", e);
        }
        if let Err(e) = self.client.close().await {
            debug!("Relay session close: {}", e);
        }
        if let Err(e) = self.socket.close().await {
            debug!("Relay socket close: {}", e);
        }
    }
}
