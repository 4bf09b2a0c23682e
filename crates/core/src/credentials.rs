//! Relay credentials and the resolver seam
//!
//! Every pipeline attempt asks the resolver for a fresh username/password
//! pair and the relay service address. Nothing here caches; a credential
//! triple lives exactly as long as the egress bridge that fetched it.

use async_trait::async_trait;

use crate::{Result, TurnwireError};

/// Scheme prefix that relay addresses may carry
const TURN_SCHEME: &str = "turn:";

/// Short-lived credentials for one relay session
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralCredentials {
    pub username: String,
    pub password: String,
    /// Relay service address, optionally prefixed with `turn:`
    pub server: String,
}

impl EphemeralCredentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            server: server.into(),
        }
    }

    /// Relay service address with any `turn:` scheme removed
    pub fn server_host_port(&self) -> Result<&str> {
        let host_port = self
            .server
            .strip_prefix(TURN_SCHEME)
            .unwrap_or(&self.server)
            .trim();
        if host_port.is_empty() {
            return Err(TurnwireError::InvalidAddress(format!(
                "empty relay server in {:?}",
                self.server
            )));
        }
        Ok(host_port)
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for EphemeralCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .finish()
    }
}

/// Fetches relay credentials for a credential locator.
///
/// Implementations must not retry or cache; a failure is fatal to the
/// pipeline that asked.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, locator: &str) -> Result<EphemeralCredentials>;
}

/// Resolver that hands out the same credentials for every locator.
///
/// Stands in for the signaling endpoint until its contract is defined.
#[derive(Debug, Clone)]
pub struct StaticCredentialResolver {
    credentials: EphemeralCredentials,
}

impl StaticCredentialResolver {
    pub fn new(credentials: EphemeralCredentials) -> Self {
        Self { credentials }
    }
}

impl Default for StaticCredentialResolver {
    fn default() -> Self {
        Self::new(EphemeralCredentials::new("user", "pass", "turn:127.0.0.1:3478"))
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, _locator: &str) -> Result<EphemeralCredentials> {
        Ok(self.credentials.clone())
    }
}
