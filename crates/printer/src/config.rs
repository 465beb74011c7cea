//! Printer configuration management

use crate::manager::{DEFAULT_INTERFACE, ManagerSettings};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterConfig {
    pub general: GeneralSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    /// Default target device
    #[serde(default)]
    pub device: DeviceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub log_level: String,
    /// Surface notices through the log (false = discard them)
    #[serde(default = "GeneralSettings::default_notifications")]
    pub notifications: bool,
}

impl GeneralSettings {
    fn default_notifications() -> bool {
        true
    }
}

/// Bulk transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Per-transfer hardware timeout in seconds
    #[serde(default = "TransferSettings::default_timeout")]
    pub timeout_secs: u64,
    /// Interface scanned for the bulk OUT endpoint
    #[serde(default = "TransferSettings::default_interface")]
    pub interface: u8,
    /// How long `print` waits for the permission outcome, in seconds
    #[serde(default = "TransferSettings::default_permission_wait")]
    pub permission_wait_secs: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
            interface: Self::default_interface(),
            permission_wait_secs: Self::default_permission_wait(),
        }
    }
}

impl TransferSettings {
    fn default_timeout() -> u64 {
        100 // printers can be slow to drain their buffers
    }

    fn default_interface() -> u8 {
        DEFAULT_INTERFACE
    }

    fn default_permission_wait() -> u64 {
        30
    }

    pub fn permission_wait(&self) -> Duration {
        Duration::from_secs(self.permission_wait_secs)
    }
}

/// Default device used when the command line names none
///
/// # Example Configuration
/// ```toml
/// [device]
/// vendor_id = 0x04b8  # Epson
/// product_id = 0x0202
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
}

impl DeviceSettings {
    /// Both ids, when both are configured
    pub fn target(&self) -> Option<(u16, u16)> {
        Some((self.vendor_id?, self.product_id?))
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            general: GeneralSettings {
                log_level: "info".to_string(),
                notifications: true,
            },
            transfer: TransferSettings::default(),
            device: DeviceSettings::default(),
        }
    }
}

impl PrinterConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path, the first existing standard location is used.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate(&Self::candidate_paths())
                .ok_or_else(|| anyhow!("No configuration file found"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: PrinterConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(&Self::candidate_paths())
    }

    fn load_or_default_from(candidates: &[PathBuf]) -> Self {
        let Some(path) = locate(candidates) else {
            tracing::debug!("No configuration file found, using defaults");
            return Self::default();
        };

        match Self::load(Some(path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Standard locations, in lookup order
    fn candidate_paths() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc/usb-printer/printer.toml"),
        ]
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
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
            config_dir.join("usb-printer").join("printer.toml")
        } else {
            PathBuf::from(".config/usb-printer/printer.toml")
        }
    }

    /// Manager tunables derived from this configuration
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            interface: self.transfer.interface,
            transfer_timeout: Duration::from_secs(self.transfer.timeout_secs),
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.transfer.timeout_secs == 0 {
            return Err(anyhow!("Transfer timeout must be greater than 0"));
        }

        if self.device.vendor_id.is_some() != self.device.product_id.is_some() {
            return Err(anyhow!(
                "Device vendor_id and product_id must be configured together"
            ));
        }

        Ok(())
    }
}

/// First candidate that exists on disk
fn locate(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.exists()).cloned()
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<PrinterConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    PrinterConfig::load(Some(path_buf))
}

/// Parse a USB id given in decimal or `0x` hex
pub fn parse_usb_id(value: &str) -> Result<u16, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse::<u16>(),
    };
    parsed.map_err(|_| format!("'{}' is not a valid USB id (0-65535 or 0x0000-0xffff)", value))
}
