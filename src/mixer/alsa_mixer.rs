//! ALSA simple-mixer backend
//!
//! Volumes are mapped linearly onto the element's playback range, so `0` is
//! the range minimum and `100` the maximum (see [`VolumeScale`]). Mute is the
//! inverse of the playback switch.

use super::{HardwareMixer, MixerFault, MixerLocator, MixerProvider, VolumeScale};
use alsa::mixer::{Mixer, Selem, SelemChannelId, SelemId};
use alsa::poll::Descriptors;
use tracing::{debug, info, warn};

pub struct AlsaMixer {
    mixer: Mixer,
    card_number: u32,
    control: String,
    scale: VolumeScale,
}

impl AlsaMixer {
    /// Two-step acquisition: the named control first, then the fallback.
    pub fn open(locator: &MixerLocator) -> Result<Self, MixerFault> {
        let card = format!("hw:{}", locator.card_number);
        let mixer = Mixer::new(&card, false).map_err(|e| {
            MixerFault::Misconfigured(format!("cannot open mixer {}: {}", card, e))
        })?;

        let control = if has_control(&mixer, &locator.control_name) {
            locator.control_name.clone()
        } else if has_control(&mixer, &locator.fallback_control) {
            warn!(
                "Control '{}' not found on {}, falling back to '{}'",
                locator.control_name, card, locator.fallback_control
            );
            locator.fallback_control.clone()
        } else {
            return Err(MixerFault::Misconfigured(format!(
                "neither '{}' nor '{}' exists on {}",
                locator.control_name, locator.fallback_control, card
            )));
        };

        info!("Bound mixer control '{}' on {}", control, card);
        Ok(Self {
            mixer,
            card_number: locator.card_number,
            control,
            scale: VolumeScale::new(),
        })
    }

    fn selem(&self) -> Result<Selem<'_>, MixerFault> {
        self.mixer
            .find_selem(&SelemId::new(&self.control, 0))
            .ok_or_else(|| {
                MixerFault::Transient(format!(
                    "control '{}' disappeared from hw:{}",
                    self.control, self.card_number
                ))
            })
    }
}

fn has_control(mixer: &Mixer, name: &str) -> bool {
    mixer.find_selem(&SelemId::new(name, 0)).is_some()
}

fn transient(op: &str, e: alsa::Error) -> MixerFault {
    MixerFault::Transient(format!("{}: {}", op, e))
}

impl HardwareMixer for AlsaMixer {
    fn volume(&mut self) -> Result<u8, MixerFault> {
        let selem = self.selem()?;
        let (min, max) = selem.get_playback_volume_range();
        let raw = selem
            .get_playback_volume(SelemChannelId::FrontLeft)
            .map_err(|e| transient("get_playback_volume", e))?;
        Ok(self.scale.to_percent(raw, min, max))
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), MixerFault> {
        let raw = {
            let selem = self.selem()?;
            let (min, max) = selem.get_playback_volume_range();
            let raw = VolumeScale::to_raw(volume, min, max);
            selem
                .set_playback_volume_all(raw)
                .map_err(|e| transient("set_playback_volume_all", e))?;
            raw
        };
        self.scale.remember(volume, raw);
        Ok(())
    }

    fn muted(&mut self) -> Result<bool, MixerFault> {
        let selem = self.selem()?;
        if !selem.has_playback_switch() {
            return Ok(false);
        }
        let switch = selem
            .get_playback_switch(SelemChannelId::FrontLeft)
            .map_err(|e| transient("get_playback_switch", e))?;
        Ok(switch == 0)
    }

    fn set_muted(&mut self, muted: bool) -> Result<(), MixerFault> {
        let selem = self.selem()?;
        if !selem.has_playback_switch() {
            return Err(MixerFault::Misconfigured(format!(
                "control '{}' has no playback switch",
                self.control
            )));
        }
        selem
            .set_playback_switch_all(if muted { 0 } else { 1 })
            .map_err(|e| transient("set_playback_switch_all", e))
    }

    fn events_pending(&mut self) -> Result<bool, MixerFault> {
        let mut fds = Descriptors::get(&self.mixer).map_err(|e| transient("poll descriptors", e))?;
        let ready = alsa::poll::poll(&mut fds, 0).map_err(|e| transient("poll", e))?;
        Ok(ready > 0)
    }

    fn drain_events(&mut self) -> Result<(), MixerFault> {
        let handled = self
            .mixer
            .handle_events()
            .map_err(|e| transient("handle_events", e))?;
        debug!("Drained {} mixer events on '{}'", handled, self.control);
        Ok(())
    }

    fn control_name(&self) -> &str {
        &self.control
    }
}

/// Opens [`AlsaMixer`] handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlsaProvider;

impl MixerProvider for AlsaProvider {
    fn acquire(&self, locator: &MixerLocator) -> Result<Box<dyn HardwareMixer>, MixerFault> {
        Ok(Box::new(AlsaMixer::open(locator)?))
    }
}
