//! TOML configuration: one `[mqtt]` table and one `[devices.<id>]` table per
//! mixer control.
//!
//! ```toml
//! [mqtt]
//! host = "192.168.1.10"
//! user = "ha"
//! password = "secret"
//!
//! [devices.living_room]
//! platform = "alsa"
//! card_number = 0
//! control_name = "PCM"
//! default_volume = 50
//! publish_interval = 60
//! ```
//!
//! All devices report availability on the single bridge-wide topic
//! `<topic_prefix>/<node_id>/availability`, which is also the last will.

use crate::mixer::{MixerFault, MixerLocator};
use crate::mqtt::config::MqttConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_DIR: &str = "alsa-mqtt-volume";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no devices with platform 'alsa' configured")]
    NoDevices,

    #[error("device '{device_id}' cannot bind its mixer control: {source}")]
    Mixer {
        device_id: String,
        #[source]
        source: MixerFault,
    },
}

/// Settings for one mixer control exposed over MQTT.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceConfig {
    /// Filled from the table key.
    #[serde(skip)]
    pub device_id: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub card_number: u32,
    #[serde(default = "default_fallback_control")]
    pub control_name: String,
    #[serde(default = "default_fallback_control")]
    pub fallback_control: String,
    #[serde(default)]
    pub default_volume: Option<u8>,
    /// Heartbeat period in seconds, `0` disables it.
    #[serde(default)]
    pub publish_interval: u64,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

fn default_platform() -> String {
    "alsa".to_string()
}

fn default_fallback_control() -> String {
    "Master".to_string()
}

impl DeviceConfig {
    pub fn locator(&self) -> MixerLocator {
        MixerLocator {
            card_number: self.card_number,
            control_name: self.control_name.clone(),
            fallback_control: self.fallback_control.clone(),
        }
    }

    pub fn is_alsa(&self) -> bool {
        self.platform.eq_ignore_ascii_case("alsa")
    }

    pub fn display_name(&self) -> String {
        self.friendly_name
            .clone()
            .unwrap_or_else(|| self.device_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    #[serde(default, deserialize_with = "deserialize_devices")]
    pub devices: BTreeMap<String, Arc<DeviceConfig>>,
}

fn deserialize_devices<'de, D>(deserializer: D) -> Result<BTreeMap<String, Arc<DeviceConfig>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, DeviceConfig>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(id, mut device)| {
            device.device_id = id.clone();
            (id, Arc::new(device))
        })
        .collect())
}

impl BridgeConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml(&content)?;
        info!("Configuration loaded: {} device(s)", config.devices.len());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host must not be empty".into()));
        }
        for (name, value) in [
            ("mqtt.topic_prefix", &self.mqtt.topic_prefix),
            ("mqtt.node_id", &self.mqtt.node_id),
            ("mqtt.discovery_prefix", &self.mqtt.discovery_prefix),
        ] {
            if value.is_empty() || value.contains(['+', '#']) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-empty topic segment without wildcards",
                    name
                )));
            }
        }
        for device in self.devices.values() {
            if device.device_id.is_empty() || device.device_id.contains(['/', '+', '#']) {
                return Err(ConfigError::Invalid(format!(
                    "device id '{}' is not a valid topic segment",
                    device.device_id
                )));
            }
            if device.control_name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' has an empty control_name",
                    device.device_id
                )));
            }
            if let Some(volume) = device.default_volume {
                if volume > 100 {
                    return Err(ConfigError::Invalid(format!(
                        "device '{}' default_volume {} is outside 0-100",
                        device.device_id, volume
                    )));
                }
            }
            debug!("Validated device {:?}", device);
        }
        if !self.devices.values().any(|d| d.is_alsa()) {
            return Err(ConfigError::NoDevices);
        }
        Ok(())
    }
}
