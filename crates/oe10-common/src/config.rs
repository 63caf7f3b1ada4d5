//! ---
//! oe10_section: "01-core-functionality"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Shared configuration and logging primitives."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Lowest peripheral id the protocol allows a device to be assigned.
pub const MIN_PERIPHERAL_ID: u8 = 0x02;
/// Highest peripheral id the protocol allows a device to be assigned.
pub const MAX_PERIPHERAL_ID: u8 = 0xFE;

fn default_port() -> String {
    "/dev/ttyAMA0".to_owned()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_peripheral_id() -> u8 {
    0x03
}

fn default_status_cache() -> Duration {
    Duration::from_millis(500)
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for the link tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "OE10_CONFIG";

    /// Load configuration from disk, respecting the `OE10_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.link.validate()?;
        self.device.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Parity setting of the serial line.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial line settings for the byte channel.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Hard wall-clock bound for a single read attempt.
    #[serde(rename = "read_timeout_ms", default = "default_read_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub read_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(anyhow!("link port must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(anyhow!("link baud_rate must be non-zero"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(anyhow!(
                "link data_bits must be between 5 and 8, got {}",
                self.data_bits
            ));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(anyhow!(
                "link stop_bits must be 1 or 2, got {}",
                self.stop_bits
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(anyhow!("link read_timeout_ms must be non-zero"));
        }
        Ok(())
    }
}

/// Addressing and caching settings for the peripheral.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_peripheral_id")]
    pub peripheral_id: u8,
    #[serde(rename = "status_cache_ms", default = "default_status_cache")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub status_cache: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            peripheral_id: default_peripheral_id(),
            status_cache: default_status_cache(),
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PERIPHERAL_ID..=MAX_PERIPHERAL_ID).contains(&self.peripheral_id) {
            return Err(anyhow!(
                "device peripheral_id {:#04x} outside {:#04x}..={:#04x}",
                self.peripheral_id,
                MIN_PERIPHERAL_ID,
                MAX_PERIPHERAL_ID
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Directory for a daily rolling log file. Stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            directory: None,
            file_prefix: None,
        }
    }
}
