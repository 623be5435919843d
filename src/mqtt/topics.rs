use crate::mqtt::config::MqttConfig;

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Bridge-wide availability topic; it is also the last will.
pub fn availability_topic(mqtt: &MqttConfig) -> String {
    format!("{}/{}/availability", mqtt.topic_prefix, mqtt.node_id)
}

/// All topics belonging to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    pub base: String,
    pub volume_set: String,
    pub volume_state: String,
    pub mute_set: String,
    pub mute_state: String,
    pub availability: String,
    pub volume_discovery: String,
    pub mute_discovery: String,
}

impl DeviceTopics {
    pub fn new(mqtt: &MqttConfig, device_id: &str) -> Self {
        let base = format!("{}/{}/{}", mqtt.topic_prefix, mqtt.node_id, device_id);
        Self {
            volume_set: format!("{}/volume/set", base),
            volume_state: format!("{}/volume/state", base),
            mute_set: format!("{}/mute/set", base),
            mute_state: format!("{}/mute/state", base),
            availability: availability_topic(mqtt),
            volume_discovery: format!(
                "{}/number/{}/{}_volume/config",
                mqtt.discovery_prefix, mqtt.node_id, device_id
            ),
            mute_discovery: format!(
                "{}/switch/{}/{}_mute/config",
                mqtt.discovery_prefix, mqtt.node_id, device_id
            ),
            base,
        }
    }

    pub fn command_topics(&self) -> [&str; 2] {
        [&self.volume_set, &self.mute_set]
    }
}

#[cfg(test)]
pub(crate) fn test_mqtt_config() -> MqttConfig {
    toml::from_str("host = \"broker.local\"").unwrap()
}
