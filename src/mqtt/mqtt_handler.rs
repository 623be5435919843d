//! Broker gateway: owns the rumqttc event loop.
//!
//! On every ConnAck the gateway subscribes the command topics, announces the
//! discovery documents and marks the bridge `online`. After a reconnect it
//! also republishes every device's state. Inbound publishes go through the
//! [`MessageRouter`] to the addressed device.

use std::time::Duration;

use chrono::Local;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    QoS,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::discovery;
use super::publisher::MqttPublisher;
use super::router::{Command, MessageRouter};
use super::topics::{availability_topic, ONLINE, OFFLINE};
use crate::device::DeviceRegistry;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const BASE_CAPACITY: usize = 64;
const PER_DEVICE_CAPACITY: usize = 16;

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connects: usize,
    pub messages_received: usize,
}

pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options
        .set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)))
        .set_clean_session(true)
        .set_last_will(LastWill::new(
            availability_topic(config),
            OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
    if let Some(user) = &config.user {
        options.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
    }
    options
}

/// Not yet connected broker session.
pub struct BrokerGateway {
    client: AsyncClient,
    eventloop: EventLoop,
    config: MqttConfig,
}

impl BrokerGateway {
    pub fn new(config: &MqttConfig, device_count: usize) -> Self {
        let capacity = BASE_CAPACITY + PER_DEVICE_CAPACITY * device_count;
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), capacity);
        info!(
            "MQTT client '{}' for {}:{} created",
            config.client_id, config.host, config.port
        );
        Self {
            client,
            eventloop,
            config: config.clone(),
        }
    }

    /// Publisher that queues onto this gateway's connection.
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher::new(self.client.clone())
    }

    /// Starts the event loop task. Connection happens on its first poll.
    pub fn spawn(self, registry: DeviceRegistry, router: MessageRouter) -> GatewayHandle {
        let stop = CancellationToken::new();
        let mut session = Session {
            client: self.client.clone(),
            config: self.config,
            registry,
            router,
            status: MqttStatus::default(),
        };
        let eventloop = self.eventloop;
        let task_stop = stop.clone();
        let task = tokio::spawn(async move { session.run(eventloop, task_stop).await });
        GatewayHandle {
            client: self.client,
            stop,
            task: Some(task),
        }
    }
}

struct Session {
    client: AsyncClient,
    config: MqttConfig,
    registry: DeviceRegistry,
    router: MessageRouter,
    status: MqttStatus,
}

impl Session {
    async fn run(&mut self, mut eventloop: EventLoop, stop: CancellationToken) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        self.on_connected().await;
                    } else {
                        error!("Broker refused connection: {:?}", ack.code);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.status.messages_received += 1;
                    debug!("Received {} ({} bytes)", publish.topic, publish.payload.len());
                    dispatch(&self.router, &self.registry, &publish.topic, &publish.payload).await;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("MQTT disconnect sent");
                    break;
                }
                Ok(event) => debug!("MQTT event: {:?}", event),
                Err(e) => {
                    if stop.is_cancelled() {
                        debug!("Connection closed during shutdown: {}", e);
                        break;
                    }
                    warn!(
                        "MQTT connection error: {}, retrying in {:?}",
                        e, RECONNECT_DELAY
                    );
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
        info!(
            "MQTT event loop finished after {} connection(s), {} message(s) received",
            self.status.connects, self.status.messages_received
        );
    }

    async fn on_connected(&mut self) {
        self.status.connects += 1;
        let reconnect = self.status.connects > 1;
        info!(
            "Connected to {}:{}{}",
            self.config.host,
            self.config.port,
            if reconnect { " (reconnect)" } else { "" }
        );

        for topic in self.router.subscriptions() {
            if let Err(e) = self.client.try_subscribe(topic, QoS::AtLeastOnce) {
                warn!("Failed to subscribe {}: {}", topic, e);
            }
        }

        for device in self.registry.values() {
            let mut device = device.lock().await;
            for (topic, payload) in
                discovery::announcements(&self.config, device.config(), device.topics())
            {
                self.publish_retained(&topic, payload);
            }
            if reconnect {
                device.publish_state(Local::now());
            }
        }

        self.publish_retained(&availability_topic(&self.config), ONLINE);
    }

    fn publish_retained(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        if let Err(e) = self
            .client
            .try_publish(topic, QoS::AtLeastOnce, true, payload)
        {
            warn!("Failed to publish {}: {}", topic, e);
        }
    }
}

/// Routes one inbound message and applies it to the addressed device.
pub async fn dispatch(
    router: &MessageRouter,
    registry: &DeviceRegistry,
    topic: &str,
    payload: &[u8],
) -> Command {
    let command = router.route(topic, payload);
    if let Command::Apply { device_id, action } = &command {
        match registry.get(device_id) {
            Some(device) => device.lock().await.apply(*action),
            None => warn!("No running device '{}' for {}", device_id, topic),
        }
    }
    command
}

/// Running gateway.
pub struct GatewayHandle {
    client: AsyncClient,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl GatewayHandle {
    /// Sends DISCONNECT after everything already queued and waits, bounded,
    /// for the event loop to flush it.
    pub async fn shutdown(&mut self) {
        self.stop.cancel();
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue MQTT disconnect: {}", e);
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => debug!("MQTT task finished"),
                Ok(Err(e)) => error!("MQTT task panicked: {}", e),
                Err(_) => {
                    warn!("MQTT task did not finish within {:?}, aborting", SHUTDOWN_TIMEOUT);
                    task.abort();
                }
            }
        }
    }
}
