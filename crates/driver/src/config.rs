//! Driver configuration management

use crate::driver::DriverOptions;
use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DriverConfig {
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub profiles: ProfileSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    #[serde(default = "DriverSettings::default_log_level")]
    pub log_level: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl DriverSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Where driver profiles come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// Base URL of the remote profile store
    #[serde(default = "ProfileSettings::default_store_url")]
    pub store_url: String,
    /// Timeout for one profile fetch in seconds
    #[serde(default = "ProfileSettings::default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Directory of `*.json` profiles loaded into the cache at startup
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            store_url: Self::default_store_url(),
            fetch_timeout_secs: Self::default_fetch_timeout(),
            local_dir: None,
        }
    }
}

impl ProfileSettings {
    fn default_store_url() -> String {
        "https://api.canscan.dev".to_string()
    }

    fn default_fetch_timeout() -> u64 {
        10
    }

    pub fn store_url(&self) -> Result<Url> {
        Url::parse(&self.store_url)
            .with_context(|| format!("Invalid profile store URL '{}'", self.store_url))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Local profile directory with `~` expanded
    pub fn local_dir(&self) -> Option<PathBuf> {
        self.local_dir
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Per-transfer timeout in milliseconds
    #[serde(default = "UsbSettings::default_transfer_timeout")]
    pub transfer_timeout_ms: u64,
    /// Size of the single bulk-in read performed per scan
    #[serde(default = "UsbSettings::default_chunk_size")]
    pub scan_chunk_size: usize,
    /// Deadline for a whole prepare or scan in seconds (0 = none)
    #[serde(default = "UsbSettings::default_operation_timeout")]
    pub operation_timeout_secs: u64,
    /// VID:PID filters (e.g. "0x04a9:*"); empty admits every device
    #[serde(default)]
    pub filters: Vec<String>,
    /// Device or interface classes considered imaging peripherals
    #[serde(default = "UsbSettings::default_class_filters")]
    pub class_filters: Vec<u8>,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            transfer_timeout_ms: Self::default_transfer_timeout(),
            scan_chunk_size: Self::default_chunk_size(),
            operation_timeout_secs: Self::default_operation_timeout(),
            filters: Vec::new(),
            class_filters: Self::default_class_filters(),
        }
    }
}

impl UsbSettings {
    fn default_transfer_timeout() -> u64 {
        5000
    }

    fn default_chunk_size() -> usize {
        64 * 1024
    }

    fn default_operation_timeout() -> u64 {
        60
    }

    fn default_class_filters() -> Vec<u8> {
        // Still image, printer, vendor-specific
        vec![0x06, 0x07, 0xFF]
    }
}

impl From<&UsbSettings> for DriverOptions {
    fn from(usb: &UsbSettings) -> Self {
        Self {
            transfer_timeout: Duration::from_millis(usb.transfer_timeout_ms),
            scan_chunk_size: usb.scan_chunk_size,
            operation_timeout: (usb.operation_timeout_secs > 0)
                .then(|| Duration::from_secs(usb.operation_timeout_secs)),
        }
    }
}

impl DriverConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/scan-driver/driver.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DriverConfig = toml::from_str(&content)
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
                tracing::warn!("Failed to load config: {}, using defaults", e);
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
            config_dir.join("scan-driver").join("driver.toml")
        } else {
            PathBuf::from(".config/scan-driver/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        self.profiles.store_url()?;
        if self.profiles.fetch_timeout_secs == 0 {
            return Err(anyhow!("fetch_timeout_secs must be greater than 0"));
        }

        if self.usb.scan_chunk_size == 0 {
            return Err(anyhow!("scan_chunk_size must be greater than 0"));
        }
        if self.usb.transfer_timeout_ms == 0 {
            return Err(anyhow!("transfer_timeout_ms must be greater than 0"));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        if filter == "*" {
            return Ok(());
        }

        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x04a9:0x1234' or '0x04a9:*')",
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
                    "Invalid {} '{}', must start with '0x' (e.g., '0x04a9')",
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
