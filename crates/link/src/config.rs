//! Link configuration

use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for one link controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Target device identity and interface selection
    #[serde(default)]
    pub device: DeviceSettings,
    /// CDC line coding applied after the interface claim
    #[serde(default)]
    pub serial: SerialSettings,
    /// Bulk transfer sizing and timeouts
    #[serde(default)]
    pub transfer: TransferSettings,
    /// Default log level when RUST_LOG is unset
    #[serde(default = "LinkConfig::default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// USB Vendor ID of the target device
    pub vendor_id: u16,
    /// USB Product ID of the target device
    pub product_id: u16,
    /// Interface index carrying the serial endpoints
    #[serde(default)]
    pub interface: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    /// 1 or 2 stop bits
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Bytes requested per bulk IN transfer (1..=64)
    pub read_buffer_len: usize,
    /// Timeout applied to every bulk and control transfer, in milliseconds.
    /// Zero ("block forever") is rejected by validation.
    pub io_timeout_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            // Arduino Uno serial bridge
            vendor_id: 0x2341,
            product_id: 0x0043,
            interface: 0,
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            read_buffer_len: 64,
            io_timeout_ms: 1000,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: DeviceSettings::default(),
            serial: SerialSettings::default(),
            transfer: TransferSettings::default(),
            log_level: Self::default_log_level(),
        }
    }
}

impl LinkConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("cdc-link").join("link.toml")
        } else {
            PathBuf::from("/etc/cdc-link/link.toml")
        }
    }

    /// Load configuration from the given path
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| LinkError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to built-in defaults
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("ignoring {}: {}", path.display(), e);
                }
            }
        }
        Self::default()
    }

    /// Save configuration to the given path, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LinkError::Config(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| LinkError::Config(format!("cannot serialize config: {}", e)))?;
        fs::write(path, contents)
            .map_err(|e| LinkError::Config(format!("cannot write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Check the configuration for values the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(LinkError::Config("baud_rate must be non-zero".into()));
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(LinkError::Config(format!(
                "data_bits must be 5..=8, got {}",
                self.serial.data_bits
            )));
        }
        if !(1..=2).contains(&self.serial.stop_bits) {
            return Err(LinkError::Config(format!(
                "stop_bits must be 1 or 2, got {}",
                self.serial.stop_bits
            )));
        }
        if !(1..=64).contains(&self.transfer.read_buffer_len) {
            return Err(LinkError::Config(format!(
                "read_buffer_len must be 1..=64, got {}",
                self.transfer.read_buffer_len
            )));
        }
        if self.transfer.io_timeout_ms == 0 {
            return Err(LinkError::Config(
                "io_timeout_ms must be non-zero; unbounded transfers cannot be stopped".into(),
            ));
        }
        Ok(())
    }

    /// Transfer timeout as a `Duration`
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer.io_timeout_ms)
    }
}
