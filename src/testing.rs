//! In-memory doubles for the mixer and the broker, shared by unit tests.

use crate::mixer::{HardwareMixer, MixerFault, MixerLocator, MixerProvider, VolumeScale};
use crate::mqtt::publisher::{PublishError, Publisher};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct FakeState {
    volume: u8,
    /// `Some(max)` for a control with a raw range of `0..=max`.
    raw_max: Option<i64>,
    raw: i64,
    muted: bool,
    pending_events: bool,
    failures_left: u32,
    drains: u32,
    writes: u32,
}

/// A simulated sound card control. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct FakeHardware {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHardware {
    pub fn new(volume: u8, muted: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                volume,
                muted,
                ..FakeState::default()
            })),
        }
    }

    /// A control with only `raw_max + 1` steps, so not every percent is
    /// representable.
    pub fn coarse(raw_max: i64, volume: u8, muted: bool) -> Self {
        let hw = Self::new(volume, muted);
        {
            let mut s = hw.state.lock().unwrap();
            s.raw_max = Some(raw_max);
            s.raw = VolumeScale::to_raw(volume, 0, raw_max);
        }
        hw
    }

    pub fn handle(&self) -> FakeMixer {
        FakeMixer {
            hw: self.clone(),
            scale: VolumeScale::new(),
        }
    }

    /// Simulate a knob turn: the value changes and an event becomes pending.
    pub fn external_volume(&self, volume: u8) {
        let mut s = self.state.lock().unwrap();
        match s.raw_max {
            Some(max) => s.raw = VolumeScale::to_raw(volume, 0, max),
            None => s.volume = volume,
        }
        s.pending_events = true;
    }

    pub fn external_mute(&self, muted: bool) {
        let mut s = self.state.lock().unwrap();
        s.muted = muted;
        s.pending_events = true;
    }

    /// The next `n` read/write calls fail with a transient fault.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().failures_left = n;
    }

    /// Volume as a freshly bound handle would read it.
    pub fn volume(&self) -> u8 {
        let s = self.state.lock().unwrap();
        match s.raw_max {
            Some(max) => VolumeScale::new().to_percent(s.raw, 0, max),
            None => s.volume,
        }
    }

    pub fn raw(&self) -> i64 {
        self.state.lock().unwrap().raw
    }

    pub fn muted(&self) -> bool {
        self.state.lock().unwrap().muted
    }

    pub fn drains(&self) -> u32 {
        self.state.lock().unwrap().drains
    }

    pub fn writes(&self) -> u32 {
        self.state.lock().unwrap().writes
    }

    fn check_fault(&self, op: &str) -> Result<(), MixerFault> {
        let mut s = self.state.lock().unwrap();
        if s.failures_left > 0 {
            s.failures_left -= 1;
            return Err(MixerFault::Transient(format!("{} failed", op)));
        }
        Ok(())
    }
}

pub struct FakeMixer {
    hw: FakeHardware,
    scale: VolumeScale,
}

impl HardwareMixer for FakeMixer {
    fn volume(&mut self) -> Result<u8, MixerFault> {
        self.hw.check_fault("volume")?;
        let s = self.hw.state.lock().unwrap();
        Ok(match s.raw_max {
            Some(max) => self.scale.to_percent(s.raw, 0, max),
            None => s.volume,
        })
    }

    /// Like ALSA, a write from this process also raises an event.
    fn set_volume(&mut self, volume: u8) -> Result<(), MixerFault> {
        self.hw.check_fault("set_volume")?;
        let mut s = self.hw.state.lock().unwrap();
        match s.raw_max {
            Some(max) => {
                s.raw = VolumeScale::to_raw(volume, 0, max);
                self.scale.remember(volume, s.raw);
            }
            None => s.volume = volume,
        }
        s.writes += 1;
        s.pending_events = true;
        Ok(())
    }

    fn muted(&mut self) -> Result<bool, MixerFault> {
        self.hw.check_fault("muted")?;
        Ok(self.hw.muted())
    }

    fn set_muted(&mut self, muted: bool) -> Result<(), MixerFault> {
        self.hw.check_fault("set_muted")?;
        let mut s = self.hw.state.lock().unwrap();
        s.muted = muted;
        s.writes += 1;
        s.pending_events = true;
        Ok(())
    }

    fn events_pending(&mut self) -> Result<bool, MixerFault> {
        Ok(self.hw.state.lock().unwrap().pending_events)
    }

    fn drain_events(&mut self) -> Result<(), MixerFault> {
        let mut s = self.hw.state.lock().unwrap();
        s.pending_events = false;
        s.drains += 1;
        Ok(())
    }

    fn control_name(&self) -> &str {
        "Fake"
    }
}

/// Hands out [`FakeMixer`] handles for one [`FakeHardware`].
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    pub hw: FakeHardware,
    acquisitions: Arc<Mutex<u32>>,
    refuse: Arc<Mutex<bool>>,
}

impl FakeProvider {
    pub fn new(hw: FakeHardware) -> Self {
        Self {
            hw,
            ..Self::default()
        }
    }

    pub fn acquisitions(&self) -> u32 {
        *self.acquisitions.lock().unwrap()
    }

    /// Make every following `acquire` fail as misconfigured.
    pub fn refuse_acquire(&self) {
        *self.refuse.lock().unwrap() = true;
    }
}

impl MixerProvider for FakeProvider {
    fn acquire(&self, locator: &MixerLocator) -> Result<Box<dyn HardwareMixer>, MixerFault> {
        if *self.refuse.lock().unwrap() {
            return Err(MixerFault::Misconfigured(format!("no control at {}", locator)));
        }
        *self.acquisitions.lock().unwrap() += 1;
        Ok(Box::new(self.hw.handle()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Captures every publish instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    log: Arc<Mutex<Vec<Published>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Published> {
        self.log.lock().unwrap().clone()
    }

    pub fn on(&self, topic: &str) -> Vec<Published> {
        self.all().into_iter().filter(|p| p.topic == topic).collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError> {
        self.log.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        });
        Ok(())
    }
}
