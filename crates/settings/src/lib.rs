//! Turnwire Settings
//!
//! Persisted proxy configuration for the CLI and mobile frontends.
//!
//! ## Features
//!
//! - Default `ProxyConfig` used when no flags are given
//! - Named presets (peer, link, listen) to switch between endpoints
//! - JSON file in the platform config directory
//!
//! ## Usage
//!
//! ```no_run
//! use turnwire_settings::{Preset, Settings};
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.upsert_preset(Preset::new("home", "203.0.113.5:51820", "link-token", "127.0.0.1:9000"));
//! settings.save()?;
//! # Ok::<(), turnwire_settings::SettingsError>(())
//! ```

mod config;

pub use config::{Preset, Settings};

use std::path::PathBuf;

use directories_next::ProjectDirs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Platform config directory, or `.turnwire` in the working directory when
/// the platform has none
pub fn default_config_dir() -> PathBuf {
    ProjectDirs::from("net", "turnwire", "turnwire")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".turnwire"))
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
