//! Configuration: every empirically-tuned knob in one serializable place.
//!
//! Loaded from `<config dir>/couchdeck/config.toml`. A missing or malformed
//! file falls back to defaults with a warning; configuration problems must
//! never keep the launcher from coming up.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use toml;
use tracing::{info, warn};

use crate::controller::hub::HubSettings;
use crate::input::router::RouterSettings;
use crate::launch::tracker::TrackerSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no usable config directory on this system")]
    NoConfigDir,

    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub tracker: TrackerSettings,
    pub catalog: CatalogConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct InputConfig {
    pub tick_interval_ms: u64,
    pub movement_delay_ms: u64,
    pub stick_threshold: i16,
    pub presence_scan_interval_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        let router = RouterSettings::default();
        let hub = HubSettings::default();
        Self {
            tick_interval_ms: router.tick_interval_ms,
            movement_delay_ms: router.movement_delay_ms,
            stick_threshold: router.stick_threshold,
            presence_scan_interval_ms: hub.presence_scan_interval_ms,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct CatalogConfig {
    /// Steam installation root. The standard install path is assumed when
    /// unset.
    pub steam_root: Option<PathBuf>,
}

impl Config {
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("couchdeck").join("config.toml"))
    }

    /// Load the config file, falling back to defaults on any problem.
    pub fn load() -> Config {
        let path = match Self::config_path() {
            Ok(path) => path,
            Err(e) => {
                warn!("{}; using default configuration", e);
                return Config::default();
            }
        };
        match fs::read_to_string(&path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Malformed config {} ({}); using defaults", path.display(), e);
                    Config::default()
                }
            },
            Err(_) => {
                info!("No config at {}; using defaults", path.display());
                Config::default()
            }
        }
    }

    /// Write the default configuration on first run so every tunable is
    /// discoverable on disk.
    pub fn ensure_default_config() -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(&Config::default())?;
        fs::write(&path, text)?;
        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            tick_interval_ms: self.input.tick_interval_ms,
            movement_delay_ms: self.input.movement_delay_ms,
            stick_threshold: self.input.stick_threshold,
        }
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            snapshot_interval_ms: self.input.tick_interval_ms,
            presence_scan_interval_ms: self.input.presence_scan_interval_ms,
        }
    }

    pub fn steam_root(&self) -> PathBuf {
        self.catalog
            .steam_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(r"C:\Program Files (x86)\Steam"))
    }
}
