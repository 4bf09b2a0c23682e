//! Turnwire Core Types
//!
//! Configuration, credentials and pipeline bookkeeping shared by every
//! Turnwire crate.

mod config;
mod conn;
mod credentials;
mod error;
mod pipeline;

pub use config::*;
pub use conn::*;
pub use credentials::*;
pub use error::*;
pub use pipeline::*;
