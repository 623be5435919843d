//! Per-device state reconciliation
//!
//! A [`DeviceState`] is the only writer of its cached `{volume, mute}` and the
//! only user of its mixer handle. Three sources feed it:
//!
//! ```text
//! MQTT command ──► apply() ──► hardware write ──► publish state
//! knob / other client ──► tick() ──► ChangeDetector ──► poll_external_change()
//! timer ──► tick() ──► maybe_publish_periodic() (heartbeat)
//! ```
//!
//! Every hardware call gets exactly one re-acquire-and-retry before the
//! operation is abandoned with a [`HardwareFault`].

mod state;

pub use state::{Changed, DeviceState, TickOutcome};

use crate::mixer::MixerFault;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Every running device, keyed by device id. Each device has its own lock.
pub type DeviceRegistry = Arc<BTreeMap<String, Arc<Mutex<DeviceState>>>>;

#[derive(Debug, Error)]
#[error("device {device_id}: {operation} failed: {source}")]
pub struct HardwareFault {
    pub device_id: String,
    pub operation: &'static str,
    #[source]
    pub source: MixerFault,
}

pub fn mute_payload(muted: bool) -> &'static str {
    if muted {
        "ON"
    } else {
        "OFF"
    }
}
