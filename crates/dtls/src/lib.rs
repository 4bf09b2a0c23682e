//! Turnwire DTLS Leg
//!
//! Client-role DTLS session over an arbitrary datagram connection. The
//! pipeline hands it one end of an in-process packet channel; everything it
//! writes ends up on the relay leg.

mod connector;

pub use connector::{DtlsConnector, SecureConnector};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DtlsError {
    #[error("Certificate generation failed: {0}")]
    Certificate(String),

    #[error("DTLS handshake failed: {0}")]
    Handshake(String),
}

pub type Result<T> = std::result::Result<T, DtlsError>;
