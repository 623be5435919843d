use super::{mute_payload, HardwareFault};
use crate::config::DeviceConfig;
use crate::mixer::{ChangeDetector, HardwareMixer, MixerFault, MixerProvider};
use crate::mqtt::publisher::Publisher;
use crate::mqtt::router::Action;
use crate::mqtt::topics::DeviceTopics;
use chrono::{DateTime, Local, TimeDelta};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MIN_STEP_VOLUME: i32 = 1;
const MAX_VOLUME: i32 = 100;

/// Topics that changed during [`DeviceState::poll_external_change`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Changed {
    pub volume: Option<u8>,
    pub mute: Option<bool>,
}

impl Changed {
    pub fn any(&self) -> bool {
        self.volume.is_some() || self.mute.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Changed(Changed),
    Heartbeat,
    Idle,
    Faulted,
}

pub struct DeviceState {
    config: Arc<DeviceConfig>,
    topics: DeviceTopics,
    volume: u8,
    muted: bool,
    last_published_at: Option<DateTime<Local>>,
    mixer: Box<dyn HardwareMixer>,
    detector: ChangeDetector,
    provider: Arc<dyn MixerProvider>,
    publisher: Arc<dyn Publisher>,
}

impl DeviceState {
    /// Binds the mixer control and reads the current hardware state.
    /// Nothing is published yet.
    pub fn acquire(
        config: Arc<DeviceConfig>,
        topics: DeviceTopics,
        provider: Arc<dyn MixerProvider>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, HardwareFault> {
        let mixer = provider
            .acquire(&config.locator())
            .map_err(|source| HardwareFault {
                device_id: config.device_id.clone(),
                operation: "acquire",
                source,
            })?;

        let mut device = Self {
            config,
            topics,
            volume: 0,
            muted: false,
            last_published_at: None,
            mixer,
            detector: ChangeDetector::new(),
            provider,
            publisher,
        };
        device.volume = device.get_volume()?;
        device.muted = device.get_mute()?;
        info!(
            "Device {} bound to '{}': volume {}, muted {}",
            device.config.device_id,
            device.mixer.control_name(),
            device.volume,
            device.muted
        );
        Ok(device)
    }

    /// Startup publish: applies `default_volume` when configured, otherwise
    /// announces the state read from hardware.
    pub fn initialize(&mut self) -> Result<(), HardwareFault> {
        match self.config.default_volume {
            Some(volume) => {
                info!(
                    "Applying default volume {} to device {}",
                    volume, self.config.device_id
                );
                self.set_volume(volume as i32)?;
                self.publish(&self.topics.mute_state, mute_payload(self.muted));
            }
            None => self.publish_state(Local::now()),
        }
        Ok(())
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    pub fn config(&self) -> &Arc<DeviceConfig> {
        &self.config
    }

    /// Cached volume.
    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Cached mute state.
    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn last_published_at(&self) -> Option<DateTime<Local>> {
        self.last_published_at
    }

    /// Fresh hardware read. The cache is left alone.
    pub fn get_volume(&mut self) -> Result<u8, HardwareFault> {
        self.with_mixer("get_volume", |mixer| mixer.volume())
    }

    pub fn get_mute(&mut self) -> Result<bool, HardwareFault> {
        self.with_mixer("get_mute", |mixer| mixer.muted())
    }

    /// Absolute set, clamped to `0..=100`.
    pub fn set_volume(&mut self, volume: i32) -> Result<(), HardwareFault> {
        self.write_volume(volume.clamp(0, MAX_VOLUME) as u8)
    }

    /// Relative step, clamped to `1..=100`.
    pub fn volume_up(&mut self) -> Result<(), HardwareFault> {
        self.step_volume(1)
    }

    pub fn volume_down(&mut self) -> Result<(), HardwareFault> {
        self.step_volume(-1)
    }

    fn step_volume(&mut self, delta: i32) -> Result<(), HardwareFault> {
        let target = (self.volume as i32 + delta).clamp(MIN_STEP_VOLUME, MAX_VOLUME);
        self.write_volume(target as u8)
    }

    fn write_volume(&mut self, volume: u8) -> Result<(), HardwareFault> {
        debug!("Setting volume of {} to {}", self.config.device_id, volume);
        self.with_mixer("set_volume", |mixer| mixer.set_volume(volume))?;
        self.volume = volume;
        self.publish(&self.topics.volume_state, &volume.to_string());
        self.last_published_at = Some(Local::now());
        Ok(())
    }

    pub fn set_mute(&mut self, muted: bool) -> Result<(), HardwareFault> {
        debug!("Setting mute of {} to {}", self.config.device_id, muted);
        self.with_mixer("set_mute", |mixer| mixer.set_muted(muted))?;
        self.muted = muted;
        self.publish(&self.topics.mute_state, mute_payload(muted));
        self.last_published_at = Some(Local::now());
        Ok(())
    }

    /// Executes a routed command. Faults are logged and swallowed, the cache
    /// keeps its last known values.
    pub fn apply(&mut self, action: Action) {
        let result = match action {
            Action::SetVolume(volume) => self.set_volume(volume as i32),
            Action::VolumeUp => self.volume_up(),
            Action::VolumeDown => self.volume_down(),
            Action::Mute(muted) => self.set_mute(muted),
        };
        if let Err(e) = result {
            warn!("Device {} abandoned '{}': {}", self.device_id(), action, e);
        }
    }

    /// Compares a fresh hardware read against the cache and publishes only
    /// the topics that differ.
    pub fn poll_external_change(&mut self) -> Result<Changed, HardwareFault> {
        let volume = self.get_volume()?;
        let muted = self.get_mute()?;

        let mut changed = Changed::default();
        if volume != self.volume {
            info!(
                "External volume change on {}: {} -> {}",
                self.config.device_id, self.volume, volume
            );
            self.volume = volume;
            self.publish(&self.topics.volume_state, &volume.to_string());
            changed.volume = Some(volume);
        }
        if muted != self.muted {
            info!(
                "External mute change on {}: {} -> {}",
                self.config.device_id, self.muted, muted
            );
            self.muted = muted;
            self.publish(&self.topics.mute_state, mute_payload(muted));
            changed.mute = Some(muted);
        }
        if changed.any() {
            self.last_published_at = Some(Local::now());
        }
        Ok(changed)
    }

    /// Heartbeat: once `publish_interval` has elapsed since the last publish,
    /// re-reads and publishes both topics even when nothing changed.
    pub fn maybe_publish_periodic(&mut self, now: DateTime<Local>) -> Result<bool, HardwareFault> {
        if self.config.publish_interval == 0 {
            return Ok(false);
        }
        let interval = TimeDelta::seconds(self.config.publish_interval as i64);
        if let Some(last) = self.last_published_at {
            if now - last < interval {
                return Ok(false);
            }
        }

        let volume = self.get_volume()?;
        let muted = self.get_mute()?;
        self.volume = volume;
        self.muted = muted;
        debug!("Heartbeat for {}", self.config.device_id);
        self.publish_state(now);
        Ok(true)
    }

    /// Publishes the cached state on both topics.
    pub fn publish_state(&mut self, now: DateTime<Local>) {
        self.publish(&self.topics.volume_state, &self.volume.to_string());
        self.publish(&self.topics.mute_state, mute_payload(self.muted));
        self.last_published_at = Some(now);
    }

    /// One supervisor tick. A handled external change takes the place of the
    /// heartbeat for this tick.
    pub fn tick(&mut self, now: DateTime<Local>) -> TickOutcome {
        if self.events_pending() {
            match self.poll_external_change() {
                Ok(changed) if changed.any() => return TickOutcome::Changed(changed),
                Ok(_) => {}
                Err(e) => {
                    warn!("Change detection abandoned: {}", e);
                    return TickOutcome::Faulted;
                }
            }
        }
        match self.maybe_publish_periodic(now) {
            Ok(true) => TickOutcome::Heartbeat,
            Ok(false) => TickOutcome::Idle,
            Err(e) => {
                warn!("Periodic publish abandoned: {}", e);
                TickOutcome::Faulted
            }
        }
    }

    fn events_pending(&mut self) -> bool {
        match self.detector.poll(self.mixer.as_mut()) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(
                    "Event poll failed on {}: {}, re-acquiring mixer",
                    self.config.device_id, e
                );
                if let Err(e) = self.reacquire("poll_events") {
                    warn!("{}", e);
                }
                false
            }
        }
    }

    /// Runs `op` against the handle; on a fault the handle is replaced once
    /// and `op` retried.
    fn with_mixer<T>(
        &mut self,
        operation: &'static str,
        mut op: impl FnMut(&mut dyn HardwareMixer) -> Result<T, MixerFault>,
    ) -> Result<T, HardwareFault> {
        match op(self.mixer.as_mut()) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => warn!(
                "{} on device {} failed: {}, re-acquiring mixer",
                operation, self.config.device_id, e
            ),
            Err(e) => warn!(
                "{} on device {} rejected: {}, re-acquiring mixer once",
                operation, self.config.device_id, e
            ),
        }
        self.reacquire(operation)?;
        op(self.mixer.as_mut()).map_err(|source| self.fault(operation, source))
    }

    fn reacquire(&mut self, operation: &'static str) -> Result<(), HardwareFault> {
        let mixer = self
            .provider
            .acquire(&self.config.locator())
            .map_err(|source| self.fault(operation, source))?;
        self.mixer = mixer;
        Ok(())
    }

    fn fault(&self, operation: &'static str, source: MixerFault) -> HardwareFault {
        HardwareFault {
            device_id: self.config.device_id.clone(),
            operation,
            source,
        }
    }

    fn publish(&self, topic: &str, payload: &str) {
        match self.publisher.publish(topic, payload, true) {
            Ok(()) => debug!("Published {} = {}", topic, payload),
            Err(e) => warn!("Device {}: {}", self.config.device_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::topics::test_mqtt_config;
    use crate::testing::{FakeHardware, FakeProvider, Published, RecordingPublisher};

    struct Rig {
        device: DeviceState,
        hw: FakeHardware,
        provider: FakeProvider,
        published: RecordingPublisher,
    }

    fn rig_with(volume: u8, muted: bool, toml_config: &str) -> Rig {
        rig_on(FakeHardware::new(volume, muted), toml_config)
    }

    fn rig_on(hw: FakeHardware, toml_config: &str) -> Rig {
        let mut config: DeviceConfig = toml::from_str(toml_config).unwrap();
        config.device_id = "den".to_string();
        let provider = FakeProvider::new(hw.clone());
        let published = RecordingPublisher::new();
        let topics = DeviceTopics::new(&test_mqtt_config(), "den");
        let device = DeviceState::acquire(
            Arc::new(config),
            topics,
            Arc::new(provider.clone()),
            Arc::new(published.clone()),
        )
        .unwrap();
        Rig {
            device,
            hw,
            provider,
            published,
        }
    }

    fn rig(volume: u8) -> Rig {
        rig_with(volume, false, "publish_interval = 60")
    }

    fn retained(topic: &str, payload: &str) -> Published {
        Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain: true,
        }
    }

    #[test]
    fn acquire_reads_hardware_without_publishing() {
        let rig = rig_with(35, true, "");
        assert_eq!(rig.device.volume(), 35);
        assert!(rig.device.muted());
        assert!(rig.published.all().is_empty());
        assert_eq!(rig.device.last_published_at(), None);
    }

    #[test]
    fn set_volume_writes_and_publishes_once() {
        for v in [0, 1, 37, 99, 100] {
            let mut rig = rig(50);
            rig.device.set_volume(v).unwrap();

            assert_eq!(rig.device.get_volume().unwrap() as i32, v);
            assert_eq!(rig.device.volume() as i32, v);
            let topic = rig.device.topics().volume_state.clone();
            assert_eq!(rig.published.all(), vec![retained(&topic, &v.to_string())]);
            assert!(rig.device.last_published_at().is_some());
        }
    }

    #[test]
    fn absolute_set_clamps_to_full_range() {
        let mut rig = rig(50);
        rig.device.set_volume(150).unwrap();
        assert_eq!(rig.hw.volume(), 100);
        rig.device.set_volume(-4).unwrap();
        assert_eq!(rig.hw.volume(), 0);
    }

    #[test]
    fn steps_stay_within_one_to_hundred() {
        let mut rig = rig(100);
        rig.device.volume_up().unwrap();
        assert_eq!(rig.device.volume(), 100);

        let mut rig = rig_with(1, false, "");
        rig.device.volume_down().unwrap();
        assert_eq!(rig.device.volume(), 1);

        let mut rig = rig_with(0, false, "");
        rig.device.volume_down().unwrap();
        assert_eq!(rig.device.volume(), 1);

        rig.device.volume_up().unwrap();
        assert_eq!(rig.device.volume(), 2);
        assert_eq!(rig.hw.volume(), 2);
    }

    #[test]
    fn set_mute_publishes_on_off() {
        let mut rig = rig(50);
        let topic = rig.device.topics().mute_state.clone();
        rig.device.set_mute(true).unwrap();
        rig.device.set_mute(false).unwrap();

        assert!(!rig.hw.muted());
        assert_eq!(
            rig.published.all(),
            vec![retained(&topic, "ON"), retained(&topic, "OFF")]
        );
    }

    #[test]
    fn single_fault_is_recovered_by_reacquire() {
        let mut rig = rig(50);
        rig.hw.fail_next(1);
        rig.device.set_volume(20).unwrap();

        assert_eq!(rig.hw.volume(), 20);
        assert_eq!(rig.provider.acquisitions(), 2);
        assert_eq!(rig.published.all().len(), 1);
    }

    #[test]
    fn repeated_fault_abandons_without_publish() {
        let mut rig = rig(50);
        rig.hw.fail_next(2);
        let err = rig.device.set_volume(20).unwrap_err();

        assert_eq!(err.operation, "set_volume");
        assert_eq!(err.device_id, "den");
        assert_eq!(rig.device.volume(), 50);
        assert_eq!(rig.hw.volume(), 50);
        assert!(rig.published.all().is_empty());

        rig.hw.fail_next(2);
        assert!(rig.device.set_mute(true).is_err());
        assert!(!rig.device.muted());
        assert!(rig.published.all().is_empty());
    }

    #[test]
    fn failed_reacquire_surfaces_fault() {
        let mut rig = rig(50);
        rig.hw.fail_next(1);
        rig.provider.refuse_acquire();
        let err = rig.device.get_volume().unwrap_err();
        assert!(!err.source.is_transient());
        assert_eq!(rig.device.volume(), 50);
    }

    #[test]
    fn apply_swallows_faults() {
        let mut rig = rig(50);
        rig.hw.fail_next(2);
        rig.device.apply(Action::VolumeUp);
        assert_eq!(rig.device.volume(), 50);

        rig.device.apply(Action::VolumeUp);
        assert_eq!(rig.device.volume(), 51);
        rig.device.apply(Action::Mute(true));
        assert!(rig.hw.muted());
    }

    #[test]
    fn external_change_publishes_only_changed_topic() {
        let mut rig = rig(50);
        rig.hw.external_volume(30);

        let changed = rig.device.poll_external_change().unwrap();
        assert_eq!(
            changed,
            Changed {
                volume: Some(30),
                mute: None
            }
        );
        assert_eq!(rig.device.volume(), 30);
        let topic = rig.device.topics().volume_state.clone();
        assert_eq!(rig.published.all(), vec![retained(&topic, "30")]);

        assert!(!rig.device.poll_external_change().unwrap().any());
        assert_eq!(rig.published.all().len(), 1);
    }

    #[test]
    fn external_mute_publishes_only_mute_topic() {
        let mut rig = rig(50);
        rig.hw.external_mute(true);

        let changed = rig.device.poll_external_change().unwrap();
        assert_eq!(
            changed,
            Changed {
                volume: None,
                mute: Some(true)
            }
        );
        assert!(rig.device.muted());
        let topic = rig.device.topics().mute_state.clone();
        assert_eq!(rig.published.all(), vec![retained(&topic, "ON")]);
    }

    #[test]
    fn read_fault_is_recovered_by_reacquire() {
        let mut rig = rig(50);
        rig.hw.fail_next(1);

        assert_eq!(rig.device.get_volume().unwrap(), 50);
        assert_eq!(rig.provider.acquisitions(), 2);
        assert!(rig.published.all().is_empty());
    }

    #[test]
    fn coarse_control_reads_back_default_volume() {
        let hw = FakeHardware::coarse(31, 80, false);
        let mut rig = rig_on(hw, "default_volume = 50\npublish_interval = 60");
        rig.device.initialize().unwrap();
        assert_eq!(rig.hw.raw(), 16);

        assert_eq!(rig.device.tick(Local::now()), TickOutcome::Idle);
        assert_eq!(rig.hw.drains(), 1);
        assert_eq!(rig.device.volume(), 50);
        let topic = rig.device.topics().volume_state.clone();
        assert_eq!(rig.published.on(&topic), vec![retained(&topic, "50")]);
    }

    #[test]
    fn coarse_control_steps_keep_climbing() {
        let hw = FakeHardware::coarse(31, 3, false);
        let mut rig = rig_on(hw, "publish_interval = 60");
        rig.device.publish_state(Local::now());
        rig.published.clear();
        assert_eq!(rig.device.volume(), 3);

        for expected in 4..=12u8 {
            rig.device.volume_up().unwrap();
            assert_eq!(rig.device.tick(Local::now()), TickOutcome::Idle);
            assert_eq!(rig.device.volume(), expected);
        }
        let topic = rig.device.topics().volume_state.clone();
        let payloads: Vec<String> = rig
            .published
            .on(&topic)
            .into_iter()
            .map(|p| p.payload)
            .collect();
        let climbing: Vec<String> = (4..=12).map(|v: u8| v.to_string()).collect();
        assert_eq!(payloads, climbing);
    }

    #[test]
    fn periodic_publish_is_a_heartbeat() {
        let mut rig = rig(50);
        let start = Local::now();
        rig.device.publish_state(start);
        rig.published.clear();

        assert!(!rig.device.maybe_publish_periodic(start + TimeDelta::seconds(10)).unwrap());
        assert!(!rig.device.maybe_publish_periodic(start + TimeDelta::seconds(59)).unwrap());
        assert!(rig.published.all().is_empty());

        let first = start + TimeDelta::seconds(60);
        assert!(rig.device.maybe_publish_periodic(first).unwrap());
        assert!(!rig.device.maybe_publish_periodic(first + TimeDelta::seconds(1)).unwrap());
        assert_eq!(rig.published.all().len(), 2);

        assert!(rig.device.maybe_publish_periodic(first + TimeDelta::seconds(61)).unwrap());
        let volume_topic = rig.device.topics().volume_state.clone();
        let volumes = rig.published.on(&volume_topic);
        assert_eq!(volumes, vec![retained(&volume_topic, "50"); 2]);
    }

    #[test]
    fn zero_interval_disables_heartbeat() {
        let mut rig = rig_with(50, false, "publish_interval = 0");
        let later = Local::now() + TimeDelta::days(1);
        assert!(!rig.device.maybe_publish_periodic(later).unwrap());
        assert_eq!(rig.device.tick(later), TickOutcome::Idle);
        assert!(rig.published.all().is_empty());
    }

    #[test]
    fn detected_change_suppresses_heartbeat_in_same_tick() {
        let mut rig = rig(50);
        rig.device.publish_state(Local::now());
        rig.published.clear();

        rig.hw.external_volume(30);
        let due = Local::now() + TimeDelta::seconds(120);
        let outcome = rig.device.tick(due);

        assert_eq!(
            outcome,
            TickOutcome::Changed(Changed {
                volume: Some(30),
                mute: None
            })
        );
        let topic = rig.device.topics().volume_state.clone();
        assert_eq!(rig.published.all(), vec![retained(&topic, "30")]);
        assert_eq!(rig.hw.drains(), 1);
    }

    #[test]
    fn event_without_change_falls_through_to_heartbeat() {
        let mut rig = rig(50);
        rig.device.publish_state(Local::now());
        rig.published.clear();

        rig.hw.external_volume(50);
        let due = Local::now() + TimeDelta::seconds(120);
        assert_eq!(rig.device.tick(due), TickOutcome::Heartbeat);
        assert_eq!(rig.published.all().len(), 2);
    }

    #[test]
    fn tick_is_idle_between_heartbeats() {
        let mut rig = rig(50);
        rig.device.publish_state(Local::now());
        assert_eq!(rig.device.tick(Local::now()), TickOutcome::Idle);
    }

    #[test]
    fn default_volume_is_applied_and_published_once() {
        let mut rig = rig_with(80, false, "default_volume = 50");
        rig.device.initialize().unwrap();

        assert_eq!(rig.hw.volume(), 50);
        let topic = rig.device.topics().volume_state.clone();
        assert_eq!(rig.published.on(&topic), vec![retained(&topic, "50")]);
    }

    #[test]
    fn initialize_without_default_announces_hardware_state() {
        let mut rig = rig_with(64, true, "");
        rig.device.initialize().unwrap();

        assert_eq!(rig.hw.writes(), 0);
        let topics = rig.device.topics().clone();
        assert_eq!(
            rig.published.all(),
            vec![
                retained(&topics.volume_state, "64"),
                retained(&topics.mute_state, "ON")
            ]
        );
    }
}
