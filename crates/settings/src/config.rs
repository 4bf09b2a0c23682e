//! Configuration types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use turnwire_core::{ProxyConfig, DEFAULT_LISTEN_ADDR};

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Configuration used when no preset or flag overrides it
    #[serde(default = "default_proxy")]
    pub proxy: ProxyConfig,

    /// Saved endpoints, unique by name
    #[serde(default)]
    pub presets: Vec<Preset>,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_proxy() -> ProxyConfig {
    ProxyConfig::new("", "", DEFAULT_LISTEN_ADDR)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy: default_proxy(),
            presets: Vec::new(),
            config_path: None,
        }
    }
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.to_path_buf());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.to_path_buf());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }

    /// Add a preset, replacing any preset with the same name
    pub fn upsert_preset(&mut self, preset: Preset) {
        match self.presets.iter_mut().find(|p| p.name == preset.name) {
            Some(existing) => *existing = preset,
            None => self.presets.push(preset),
        }
    }

    pub fn remove_preset(&mut self, name: &str) -> Result<Preset> {
        let index = self
            .presets
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| SettingsError::PresetNotFound(name.to_string()))?;
        Ok(self.presets.remove(index))
    }

    /// Default proxy configuration with the named preset's endpoints
    pub fn proxy_for_preset(&self, name: &str) -> Result<ProxyConfig> {
        let preset = self
            .preset(name)
            .ok_or_else(|| SettingsError::PresetNotFound(name.to_string()))?;
        Ok(preset.apply(self.proxy.clone()))
    }
}

/// A saved peer/link/listen triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub peer: String,
    pub link: String,
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

impl Preset {
    pub fn new(
        name: impl Into<String>,
        peer: impl Into<String>,
        link: impl Into<String>,
        listen: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            peer: peer.into(),
            link: link.into(),
            listen: listen.into(),
        }
    }

    /// Overwrite the endpoint fields of `config`, keeping streams,
    /// transport and realm
    pub fn apply(&self, mut config: ProxyConfig) -> ProxyConfig {
        config.peer = self.peer.clone();
        config.link = self.link.clone();
        config.listen = self.listen.clone();
        config
    }
}
