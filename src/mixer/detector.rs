//! Detects hardware-originated mixer changes (knob turns, other clients).

use super::{HardwareMixer, MixerFault};
use tracing::debug;

/// Zero-timeout readiness check against a mixer's event source.
///
/// When events are pending they are drained before `poll` returns, otherwise
/// the same event would be reported again on the next tick and the cached
/// element values would stay stale.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    events_seen: u64,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self, mixer: &mut dyn HardwareMixer) -> Result<bool, MixerFault> {
        if !mixer.events_pending()? {
            return Ok(false);
        }
        mixer.drain_events()?;
        self.events_seen += 1;
        debug!(
            "Mixer events pending on '{}' ({} so far)",
            mixer.control_name(),
            self.events_seen
        );
        Ok(true)
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }
}
