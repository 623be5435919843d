//! Supervisor with statum state machine for the bridge lifecycle
//!
//! # State Machine
//!
//! ```text
//! Starting ──► Running ──► Stopping ──► Stopped
//! ```
//!
//! `Starting` binds one mixer per configured ALSA device, publishes initial
//! state and spawns the broker gateway. `Running` ticks every device until the
//! shutdown token fires. `Stopping` marks the bridge offline and disconnects.

use crate::config::{BridgeConfig, ConfigError};
use crate::device::{DeviceRegistry, DeviceState, TickOutcome};
use crate::mixer::MixerProvider;
use crate::mqtt::mqtt_handler::{BrokerGateway, GatewayHandle};
use crate::mqtt::publisher::Publisher;
use crate::mqtt::router::MessageRouter;
use crate::mqtt::topics::{availability_topic, DeviceTopics, OFFLINE};
use chrono::Local;
use statum::{machine, state};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

#[state]
#[derive(Debug, Clone)]
pub enum SupervisorState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[machine]
pub struct Supervisor<S: SupervisorState> {
    config: Arc<BridgeConfig>,
    provider: Arc<dyn MixerProvider>,
    publisher: Arc<dyn Publisher>,
    shutdown: CancellationToken,
    tick_interval: Duration,
    registry: DeviceRegistry,
    gateway: Option<GatewayHandle>,
}

impl<S: SupervisorState> Supervisor<S> {
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }
}

impl Supervisor<Starting> {
    pub fn create(
        config: Arc<BridgeConfig>,
        provider: Arc<dyn MixerProvider>,
        publisher: Arc<dyn Publisher>,
        shutdown: CancellationToken,
        tick_interval: Duration,
    ) -> Self {
        Self::new(
            config,
            provider,
            publisher,
            shutdown,
            tick_interval,
            Arc::new(BTreeMap::new()),
            None,
        )
    }

    /// Builds the device registry and brings the broker session up.
    ///
    /// A device whose control and fallback both fail to bind is a
    /// configuration error. A fault while applying the default volume is only
    /// logged.
    pub fn start(
        mut self,
        gateway: Option<BrokerGateway>,
    ) -> Result<Supervisor<Running>, ConfigError> {
        info!("Starting bridge");
        let mut devices = BTreeMap::new();
        let mut router = MessageRouter::new();

        for (device_id, device_config) in &self.config.devices {
            if !device_config.is_alsa() {
                warn!(
                    "Skipping device {}: unsupported platform '{}'",
                    device_id, device_config.platform
                );
                continue;
            }

            let topics = DeviceTopics::new(&self.config.mqtt, device_id);
            let mut device = DeviceState::acquire(
                device_config.clone(),
                topics.clone(),
                self.provider.clone(),
                self.publisher.clone(),
            )
            .map_err(|fault| ConfigError::Mixer {
                device_id: device_id.clone(),
                source: fault.source,
            })?;

            if let Err(e) = device.initialize() {
                warn!("Initial state of {} not applied: {}", device_id, e);
            }

            router.register(device_id, &topics);
            devices.insert(device_id.clone(), Arc::new(Mutex::new(device)));
        }

        if devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        self.registry = Arc::new(devices);

        if let Some(gateway) = gateway {
            self.gateway = Some(gateway.spawn(self.registry.clone(), router));
        }

        info!("Bridge running with {} device(s)", self.registry.len());
        Ok(self.transition())
    }
}

impl Supervisor<Running> {
    /// One pass over every device. Each device is locked on its own, so an
    /// inbound command for one device never waits on another.
    pub async fn tick_once(&self) -> Vec<(String, TickOutcome)> {
        let mut outcomes = Vec::with_capacity(self.registry.len());
        for (device_id, device) in self.registry.iter() {
            let outcome = device.lock().await.tick(Local::now());
            if outcome != TickOutcome::Idle {
                debug!("Tick {}: {:?}", device_id, outcome);
            }
            outcomes.push((device_id.clone(), outcome));
        }
        outcomes
    }

    /// Ticks until the shutdown token is cancelled. The token is checked
    /// before every pass; a pass in progress always completes.
    pub async fn run_until_shutdown(self) -> Supervisor<Stopping> {
        info!("Supervisor loop started, tick {:?}", self.tick_interval);
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.tick_once().await;

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        info!("Shutdown requested, stopping supervisor");
        self.transition()
    }
}

impl Supervisor<Stopping> {
    /// Marks the bridge offline and tears down the broker connection.
    pub async fn shutdown(mut self) -> Supervisor<Stopped> {
        let topic = availability_topic(&self.config.mqtt);
        if let Err(e) = self.publisher.publish(&topic, OFFLINE, true) {
            warn!("Failed to publish offline availability: {}", e);
        }
        if let Some(mut gateway) = self.gateway.take() {
            gateway.shutdown().await;
        }
        info!("Bridge stopped");
        self.transition()
    }
}

impl Supervisor<Stopped> {}
