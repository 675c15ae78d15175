//! Configuration loading and parsing

use anyhow::{Context, Result};
use bus_sim_core::{CanChannelConfig, SerialChannelConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub can: CanSection,
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub run: RunConfig,
}

/// `[can]` table: channel settings plus whether to run it at all
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub channel: CanChannelConfig,
}

/// `[serial]` table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub channel: SerialChannelConfig,
}

/// `[run]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunConfig {
    /// Stop after this many seconds; run until Ctrl-C if absent
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One readable line per event
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

fn default_enabled() -> bool {
    true
}

impl Default for CanSection {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: CanChannelConfig::default(),
        }
    }
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: SerialChannelConfig::default(),
        }
    }
}

impl AppConfig {
    /// Check every enabled channel's settings
    pub fn validate(&self) -> Result<()> {
        if !self.can.enabled && !self.serial.enabled {
            anyhow::bail!("Both channels are disabled; nothing to run");
        }
        if self.can.enabled {
            self.can.channel.validate().context("Invalid [can] configuration")?;
        }
        if self.serial.enabled {
            self.serial
                .channel
                .validate()
                .context("Invalid [serial] configuration")?;
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
