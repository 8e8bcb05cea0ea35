//! Bridge configuration management

use crate::usb::WorkerSettings;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub bridge: BridgeSettings,
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns of managed devices (empty = none, "*:*" = all)
    #[serde(default = "UsbSettings::default_filters")]
    pub filters: Vec<String>,
    /// Run connect-all when a session starts
    #[serde(default = "UsbSettings::default_connect_on_start")]
    pub connect_on_start: bool,
    /// How long the worker waits for USB events per poll
    #[serde(default = "UsbSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Control transfer timeout
    #[serde(default = "UsbSettings::default_transfer_timeout")]
    pub transfer_timeout_ms: u64,
}

/// Shared V-USB vendor-class ID the RGB firmware enumerates with
pub const DEFAULT_DEVICE_FILTER: &str = "0x16c0:0x05dc";

impl UsbSettings {
    fn default_filters() -> Vec<String> {
        vec![DEFAULT_DEVICE_FILTER.to_string()]
    }

    fn default_connect_on_start() -> bool {
        true
    }

    fn default_poll_interval() -> u64 {
        100
    }

    fn default_transfer_timeout() -> u64 {
        1000
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeSettings {
                log_level: "info".to_string(),
            },
            usb: UsbSettings {
                filters: UsbSettings::default_filters(),
                connect_on_start: UsbSettings::default_connect_on_start(),
                poll_interval_ms: UsbSettings::default_poll_interval(),
                transfer_timeout_ms: UsbSettings::default_transfer_timeout(),
            },
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path the standard locations are tried in order. A leading
    /// `~` in an explicit path is expanded.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-rgb-bridge/bridge.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: BridgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-rgb-bridge").join("bridge.toml")
        } else {
            PathBuf::from(".config/usb-rgb-bridge/bridge.toml")
        }
    }

    /// Settings handed to the USB worker thread
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            filters: self.usb.filters.clone(),
            poll_interval: Duration::from_millis(self.usb.poll_interval_ms),
            transfer_timeout: Duration::from_millis(self.usb.transfer_timeout_ms),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.bridge.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.bridge.log_level,
                valid_levels.join(", ")
            ));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }
        if self.usb.filters.is_empty() {
            tracing::warn!("usb.filters is empty, no devices will be managed");
        }

        if self.usb.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than 0"));
        }
        if self.usb.transfer_timeout_ms == 0 {
            return Err(anyhow!("transfer_timeout_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x16c0:0x05dc' or '0x16c0:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }
        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        let hex_part = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .ok_or_else(|| {
                anyhow!(
                    "Invalid {} '{}', must start with '0x' (e.g., '0x16c0')",
                    name,
                    id
                )
            })?;

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}
