use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{ensure, Context, Result};
use shared::protocol::{
    DEFAULT_CONTACT, DEFAULT_MX_SECS, MEDIA_RENDERER_SERVICE_TYPE, SSDP_MULTICAST_ADDR,
    SUPPORTED_MANUFACTURERS,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub notice: NoticeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_mx")]
    pub mx_secs: u64,
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_manufacturers")]
    pub manufacturers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    #[serde(default = "default_age_out_interval")]
    pub age_out_interval_secs: u64,
    #[serde(default = "default_no_devices_after")]
    pub no_devices_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoticeConfig {
    #[serde(default = "default_contact")]
    pub contact: String,
}

fn default_service_type() -> String {
    MEDIA_RENDERER_SERVICE_TYPE.to_string()
}

fn default_mx() -> u64 {
    DEFAULT_MX_SECS
}

fn default_multicast_addr() -> SocketAddr {
    SSDP_MULTICAST_ADDR
}

fn default_request_timeout() -> u64 {
    5
}

fn default_manufacturers() -> Vec<String> {
    SUPPORTED_MANUFACTURERS.iter().map(|m| m.to_string()).collect()
}

fn default_stale_after() -> u64 {
    5
}

fn default_age_out_interval() -> u64 {
    1
}

fn default_no_devices_after() -> u64 {
    5
}

fn default_contact() -> String {
    DEFAULT_CONTACT.to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            mx_secs: default_mx(),
            multicast_addr: default_multicast_addr(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            manufacturers: default_manufacturers(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
            age_out_interval_secs: default_age_out_interval(),
            no_devices_after_secs: default_no_devices_after(),
        }
    }
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            contact: default_contact(),
        }
    }
}

impl DiscoveryConfig {
    pub fn mx(&self) -> Duration {
        Duration::from_secs(self.mx_secs)
    }
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ModelConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn age_out_interval(&self) -> Duration {
        Duration::from_secs(self.age_out_interval_secs)
    }

    pub fn no_devices_after(&self) -> Duration {
        Duration::from_secs(self.no_devices_after_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Reject values that would stall or flood: every duration drives a timer
    /// or a network window and must be non-zero.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.discovery.mx_secs > 0, "discovery.mx_secs must be at least 1");
        ensure!(
            self.device.request_timeout_secs > 0,
            "device.request_timeout_secs must be at least 1"
        );
        ensure!(self.model.stale_after_secs > 0, "model.stale_after_secs must be at least 1");
        ensure!(
            self.model.age_out_interval_secs > 0,
            "model.age_out_interval_secs must be at least 1"
        );
        ensure!(!self.device.manufacturers.is_empty(), "device.manufacturers must not be empty");
        Ok(())
    }

    /// Load from an explicit path, or from `default_path` if it exists, or fall back to defaults
    pub fn load_or_default(explicit: Option<&Path>, default_path: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None if default_path.exists() => Self::load(default_path),
            None => {
                tracing::debug!("No config at {}, using defaults", default_path.display());
                Ok(Self::default())
            }
        }
    }
}
