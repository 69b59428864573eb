//! Client configuration, loaded from `$PSU_HOME/config.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use psu_proto::ConfigLayout;
use psu_proto::ble;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Get PSU_HOME directory (`~/.psu` unless overridden)
pub fn psu_home() -> Result<PathBuf, Error> {
    match std::env::var("PSU_HOME") {
        Ok(dir) => Ok(PathBuf::from(dir)),
        Err(_) => dirs::home_dir()
            .map(|h| h.join(".psu"))
            .ok_or_else(|| Error::Config("no home directory".to_string())),
    }
}

/// Transaction engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-attempt wait for the response notification, from the write
    pub request_timeout_ms: u64,
    /// Attempts per request, including the first
    pub max_retries: u32,
    /// MTU to request where the platform allows it
    pub mtu: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2000,
            max_retries: 3,
            mtu: Some(247),
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// UUIDs of the telemetry service and the provisioning endpoint conventions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattConfig {
    pub service_uuid: String,
    pub request_uuid: String,
    pub response_uuid: String,
    pub device_name_prefix: String,
    pub provisioning_service_uuid: String,
    /// Substrings matched against characteristic UUIDs
    pub scan_match: String,
    pub session_match: String,
    pub config_match: String,
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            service_uuid: ble::SERVICE_UUID.to_string(),
            request_uuid: ble::REQUEST_UUID.to_string(),
            response_uuid: ble::RESPONSE_UUID.to_string(),
            device_name_prefix: ble::DEVICE_NAME_PREFIX.to_string(),
            provisioning_service_uuid: ble::provisioning::SERVICE_UUID.to_string(),
            scan_match: ble::provisioning::SCAN_MATCH.to_string(),
            session_match: ble::provisioning::SESSION_MATCH.to_string(),
            config_match: ble::provisioning::CONFIG_MATCH.to_string(),
        }
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(s).map_err(|e| Error::Config(format!("invalid UUID {s:?}: {e}")))
}

impl GattConfig {
    pub fn service(&self) -> Result<Uuid, Error> {
        parse_uuid(&self.service_uuid)
    }

    pub fn request(&self) -> Result<Uuid, Error> {
        parse_uuid(&self.request_uuid)
    }

    pub fn response(&self) -> Result<Uuid, Error> {
        parse_uuid(&self.response_uuid)
    }

    pub fn provisioning_service(&self) -> Result<Uuid, Error> {
        parse_uuid(&self.provisioning_service_uuid)
    }
}

/// Wi-Fi provisioning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Proof of possession printed on the device
    pub pop: Option<String>,
    pub scan_period_ms: u32,
    pub scan_passive: bool,
    pub scan_poll_interval_ms: u64,
    pub scan_timeout_ms: u64,
    /// Access points fetched per result request
    pub scan_batch_size: u32,
    /// Send ApplyConfig after SetConfig
    pub apply_config: bool,
    pub status_poll_interval_ms: u64,
    pub status_timeout_ms: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            pop: None,
            scan_period_ms: 120,
            scan_passive: false,
            scan_poll_interval_ms: 500,
            scan_timeout_ms: 10_000,
            scan_batch_size: 4,
            apply_config: true,
            status_poll_interval_ms: 2000,
            status_timeout_ms: 30_000,
        }
    }
}

impl ProvisioningConfig {
    pub fn scan_poll_interval(&self) -> Duration {
        Duration::from_millis(self.scan_poll_interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

/// Everything the client reads from the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub engine: EngineConfig,
    pub gatt: GattConfig,
    pub provisioning: ProvisioningConfig,
    /// Name of the config bundle layout: "v1" or "v2"
    pub config_layout: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            gatt: GattConfig::default(),
            provisioning: ProvisioningConfig::default(),
            config_layout: "v2".to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from `$PSU_HOME/config.json`; a missing file means defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => psu_home()?.join("config.json"),
        };
        if path.exists() {
            tracing::debug!(path = %path.display(), "loading config");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn layout(&self) -> Result<ConfigLayout, Error> {
        ConfigLayout::by_name(&self.config_layout)
            .ok_or_else(|| Error::Config(format!("unknown config layout {:?}", self.config_layout)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.engine.max_retries == 0 {
            return Err(Error::Config("engine.max_retries must be at least 1".to_string()));
        }
        if self.provisioning.scan_batch_size == 0 {
            return Err(Error::Config(
                "provisioning.scan_batch_size must be at least 1".to_string(),
            ));
        }
        self.gatt.service()?;
        self.gatt.request()?;
        self.gatt.response()?;
        self.gatt.provisioning_service()?;
        self.layout()?;
        Ok(())
    }
}
