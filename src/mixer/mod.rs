//! Hardware mixer capability
//!
//! Everything that touches the sound card goes through the [`HardwareMixer`]
//! trait. A [`MixerProvider`] hands out fresh handles so a device can throw a
//! broken handle away and bind a new one.
//!
//! ```text
//! MixerProvider ──acquire──► Box<dyn HardwareMixer> ──owned by──► DeviceState
//!                                    │
//!                              ChangeDetector (zero-timeout poll)
//! ```

pub mod alsa_mixer;
pub mod detector;

use std::fmt;
use thiserror::Error;

pub use alsa_mixer::AlsaProvider;
pub use detector::ChangeDetector;

/// Faults reported by a mixer backend.
///
/// `Transient` covers I/O failures on an otherwise valid control and is worth
/// a re-acquire. `Misconfigured` means the control cannot exist with the
/// current configuration (no such card, no such element).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MixerFault {
    #[error("transient mixer fault: {0}")]
    Transient(String),

    #[error("mixer misconfigured: {0}")]
    Misconfigured(String),
}

impl MixerFault {
    pub fn is_transient(&self) -> bool {
        matches!(self, MixerFault::Transient(_))
    }
}

/// Where to find a control on the sound subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerLocator {
    pub card_number: u32,
    pub control_name: String,
    pub fallback_control: String,
}

impl fmt::Display for MixerLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hw:{} '{}' (fallback '{}')",
            self.card_number, self.control_name, self.fallback_control
        )
    }
}

/// Percent view of a raw playback range.
///
/// Controls with fewer than 101 steps cannot represent every percent, so a
/// written percent generally reads back as a neighbour. The scale remembers
/// the last `(percent, raw)` pair written and reports that percent for as
/// long as the hardware still holds that raw value.
#[derive(Debug, Default, Clone)]
pub struct VolumeScale {
    last_written: Option<(u8, i64)>,
}

impl VolumeScale {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_raw(percent: u8, min: i64, max: i64) -> i64 {
        min + ((max - min) as f64 * percent.min(100) as f64 / 100.0).round() as i64
    }

    /// Record a write that reached the hardware.
    pub fn remember(&mut self, percent: u8, raw: i64) {
        self.last_written = Some((percent.min(100), raw));
    }

    pub fn to_percent(&self, raw: i64, min: i64, max: i64) -> u8 {
        if let Some((percent, written)) = self.last_written {
            if written == raw {
                return percent;
            }
        }
        if max <= min {
            return 0;
        }
        let pct = ((raw - min) as f64 * 100.0 / (max - min) as f64).round();
        pct.clamp(0.0, 100.0) as u8
    }
}

/// One live binding to a volume/mute control.
///
/// Volumes are percentages in `0..=100`.
pub trait HardwareMixer: Send {
    fn volume(&mut self) -> Result<u8, MixerFault>;

    fn set_volume(&mut self, volume: u8) -> Result<(), MixerFault>;

    fn muted(&mut self) -> Result<bool, MixerFault>;

    fn set_muted(&mut self, muted: bool) -> Result<(), MixerFault>;

    /// Non-blocking check for pending hardware events.
    fn events_pending(&mut self) -> Result<bool, MixerFault>;

    /// Acknowledge pending events so they do not fire again.
    fn drain_events(&mut self) -> Result<(), MixerFault>;

    /// Name of the control this handle is bound to (after fallback).
    fn control_name(&self) -> &str;
}

/// Source of mixer handles.
pub trait MixerProvider: Send + Sync + 'static {
    /// Bind `locator.control_name`, falling back to `locator.fallback_control`
    /// when the named control is unavailable.
    fn acquire(&self, locator: &MixerLocator) -> Result<Box<dyn HardwareMixer>, MixerFault>;
}
