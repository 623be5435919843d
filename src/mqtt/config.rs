use serde::Deserialize;

/// Broker connection and Home Assistant presentation settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Where Home Assistant listens for discovery documents.
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    /// First segment of every state/command topic.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Groups all devices of this bridge, also used as the discovery node id.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_sw_version")]
    pub sw_version: String,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "alsa-mqtt-volume".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_topic_prefix() -> String {
    "alsa".to_string()
}

fn default_node_id() -> String {
    "alsa_mqtt_volume".to_string()
}

fn default_device_name() -> String {
    "ALSA Volume Bridge".to_string()
}

fn default_manufacturer() -> String {
    "ALSA".to_string()
}

fn default_model() -> String {
    "Mixer".to_string()
}

fn default_sw_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
