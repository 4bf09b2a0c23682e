use thiserror::Error;

#[derive(Error, Debug)]
pub enum TurnwireError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TurnwireError>;
