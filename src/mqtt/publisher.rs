//! Outbound side of the broker connection as seen by devices.
//!
//! Publishing never awaits: requests are queued on the rumqttc request channel
//! and flushed by the gateway's event loop. This lets a device publish while
//! holding its own lock.

use rumqttc::{AsyncClient, QoS};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },
}

pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError>;
}

/// [`Publisher`] backed by a rumqttc client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client,
            qos: QoS::AtLeastOnce,
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, self.qos, retain, payload.as_bytes().to_vec())
            .map_err(|e| PublishError::Rejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}
