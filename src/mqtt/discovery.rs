//! Home Assistant discovery documents.

use crate::config::DeviceConfig;
use crate::mqtt::config::MqttConfig;
use crate::mqtt::topics::DeviceTopics;
use serde_json::{json, Value};

fn device_block(mqtt: &MqttConfig) -> Value {
    json!({
        "name": mqtt.device_name,
        "ids": [mqtt.node_id],
        "mf": mqtt.manufacturer,
        "mdl": mqtt.model,
        "sw": mqtt.sw_version,
    })
}

/// `number` entity for the volume control.
pub fn volume_entity(mqtt: &MqttConfig, device: &DeviceConfig, topics: &DeviceTopics) -> Value {
    json!({
        "name": format!("{} Volume", device.display_name()),
        "uniq_id": format!("{}_{}_volume", mqtt.node_id, device.device_id),
        "device": device_block(mqtt),
        "avty_t": topics.availability,
        "cmd_t": topics.volume_set,
        "stat_t": topics.volume_state,
        "icon": "mdi:volume-high",
        "min": 0,
        "max": 100,
        "step": 1,
        "ret": true,
    })
}

/// `switch` entity for the mute control.
pub fn mute_entity(mqtt: &MqttConfig, device: &DeviceConfig, topics: &DeviceTopics) -> Value {
    json!({
        "name": format!("{} Mute", device.display_name()),
        "uniq_id": format!("{}_{}_mute", mqtt.node_id, device.device_id),
        "device": device_block(mqtt),
        "avty_t": topics.availability,
        "cmd_t": topics.mute_set,
        "stat_t": topics.mute_state,
        "icon": "mdi:volume-off",
        "pl_on": "ON",
        "pl_off": "OFF",
        "ret": true,
    })
}

/// `(topic, payload)` pairs to publish retained for one device.
pub fn announcements(
    mqtt: &MqttConfig,
    device: &DeviceConfig,
    topics: &DeviceTopics,
) -> Vec<(String, String)> {
    vec![
        (
            topics.volume_discovery.clone(),
            volume_entity(mqtt, device, topics).to_string(),
        ),
        (
            topics.mute_discovery.clone(),
            mute_entity(mqtt, device, topics).to_string(),
        ),
    ]
}
