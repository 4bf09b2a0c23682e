use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use webrtc_dtls::cipher_suite::CipherSuiteId;
use webrtc_dtls::config::{Config, ExtendedMasterSecretType};
use webrtc_dtls::conn::DTLSConn;
use webrtc_dtls::crypto::Certificate;

use turnwire_core::SharedConn;

use crate::{DtlsError, Result};

/// Subject name on the throwaway client certificate
const CERTIFICATE_NAME: &str = "turnwire";

/// Wraps a datagram transport in a client-role security session.
///
/// Implementations run the whole handshake before returning. A failure is
/// fatal to the calling pipeline; nothing retries.
#[async_trait]
pub trait SecureConnector: Send + Sync {
    async fn connect(&self, transport: SharedConn) -> Result<SharedConn>;
}

/// DTLS 1.2 client backed by `webrtc-dtls`.
///
/// Each call generates a fresh self-signed certificate and skips peer
/// verification: the remote peer is authorised by whoever issued the relay
/// credentials, not by certificate trust.
#[derive(Debug, Clone)]
pub struct DtlsConnector {
    cipher_suites: Vec<CipherSuiteId>,
}

impl DtlsConnector {
    pub fn new() -> Self {
        Self {
            cipher_suites: vec![CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_128_Gcm_Sha256],
        }
    }

    fn client_config(&self) -> Result<Config> {
        let certificate = Certificate::generate_self_signed(vec![CERTIFICATE_NAME.to_owned()])
            .map_err(|e| DtlsError::Certificate(e.to_string()))?;

        Ok(Config {
            certificates: vec![certificate],
            insecure_skip_verify: true,
            extended_master_secret: ExtendedMasterSecretType::Require,
            cipher_suites: self.cipher_suites.clone(),
            ..Default::default()
        })
    }
}

impl Default for DtlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureConnector for DtlsConnector {
    async fn connect(&self, transport: SharedConn) -> Result<SharedConn> {
        let config = self.client_config()?;

        debug!("Starting DTLS handshake");
        let conn = DTLSConn::new(transport, config, true, None)
            .await
            .map_err(|e| DtlsError::Handshake(e.to_string()))?;
        info!("Established DTLS connection");

        Ok(Arc::new(conn))
    }
}
