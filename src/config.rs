//! On-disk configuration for padmux.
//!
//! Lives at `<config dir>/padmux/padmux.toml` unless `PADMUX_CONFIG` points
//! elsewhere. Every section falls back to defaults, so a partial file is valid.

use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapter::UsbAdapterSettings;
use crate::controller::gamepad::GamepadSettings;
use crate::controller::keyboard::KeyBindings;
use crate::controller::recorded::RecordedSettings;

const CONFIG_DIR: &str = "padmux";
const CONFIG_FILE: &str = "padmux.toml";
pub const CONFIG_ENV: &str = "PADMUX_CONFIG";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PollSettings {
    /// Hub polls per second
    pub tick_hz: u32,
    pub stats_interval_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            tick_hz: 30,
            stats_interval_secs: 10,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub poll: PollSettings,
    pub gamepad: GamepadSettings,
    pub keyboard: KeyBindings,
    pub recorded: RecordedSettings,
    pub usb_adapter: UsbAdapterSettings,
}

impl Config {
    pub fn path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the config from [`Config::path`], writing defaults first if it is missing.
    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::path()).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        Self::ensure_default_config(path).await?;

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| eyre!("Failed to parse config {}: {}", path.display(), e))?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| eyre!("Failed to write config {}: {}", path.display(), e))?;
        Ok(())
    }

    async fn ensure_default_config(path: &Path) -> Result<()> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config exists: {}", e))?;
        if !exists {
            info!("Creating default configuration at {}", path.display());
            Config::default().save_to(path).await?;
        }
        Ok(())
    }
}
