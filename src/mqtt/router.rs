//! Inbound message routing.
//!
//! Turns a raw `(topic, payload)` pair into a [`Command`] for one device.
//! Pure: no broker, no hardware, no locking.

use crate::mqtt::topics::DeviceTopics;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SetVolume(u8),
    VolumeUp,
    VolumeDown,
    Mute(bool),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SetVolume(v) => write!(f, "set volume {}", v),
            Action::VolumeUp => write!(f, "volume up"),
            Action::VolumeDown => write!(f, "volume down"),
            Action::Mute(true) => write!(f, "mute"),
            Action::Mute(false) => write!(f, "unmute"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Apply { device_id: String, action: Action },
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("volume payload '{0}' is neither UP, DOWN nor an integer")]
    NotVolume(String),

    #[error("volume {0} is outside 0-100")]
    VolumeOutOfRange(i64),

    #[error("mute payload '{0}' is not one of ON, OFF, 1, 0, TRUE, FALSE")]
    NotMute(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Volume,
    Mute,
}

const VOLUME_SET_SUFFIX: &str = "/volume/set";
const MUTE_SET_SUFFIX: &str = "/mute/set";

fn decode(payload: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(payload)
        .map(str::trim)
        .map_err(|_| ParseError::NotUtf8)
}

pub fn parse_volume(payload: &[u8]) -> Result<Action, ParseError> {
    let text = decode(payload)?;
    match text.to_ascii_uppercase().as_str() {
        "UP" => return Ok(Action::VolumeUp),
        "DOWN" => return Ok(Action::VolumeDown),
        _ => {}
    }
    let value: i64 = text
        .parse()
        .map_err(|_| ParseError::NotVolume(text.to_string()))?;
    if !(0..=100).contains(&value) {
        return Err(ParseError::VolumeOutOfRange(value));
    }
    Ok(Action::SetVolume(value as u8))
}

pub fn parse_mute(payload: &[u8]) -> Result<Action, ParseError> {
    let text = decode(payload)?;
    match text.to_ascii_uppercase().as_str() {
        "ON" | "1" | "TRUE" => Ok(Action::Mute(true)),
        "OFF" | "0" | "FALSE" => Ok(Action::Mute(false)),
        _ => Err(ParseError::NotMute(text.to_string())),
    }
}

/// Maps command topics to devices.
#[derive(Debug, Default, Clone)]
pub struct MessageRouter {
    routes: HashMap<String, (String, Control)>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, device_id: &str, topics: &DeviceTopics) {
        let controls = [Control::Volume, Control::Mute];
        for (topic, control) in topics.command_topics().into_iter().zip(controls) {
            self.routes
                .insert(topic.to_string(), (device_id.to_string(), control));
        }
        debug!("Routing {}/+/set to device {}", topics.base, device_id);
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Single entry point for inbound messages. Malformed payloads are logged
    /// and become [`Command::Noop`].
    pub fn route(&self, topic: &str, payload: &[u8]) -> Command {
        let Some((device_id, control)) = self.routes.get(topic) else {
            debug!("Ignoring message on unrouted topic {}", topic);
            return Command::Noop;
        };
        debug_assert!(match control {
            Control::Volume => topic.ends_with(VOLUME_SET_SUFFIX),
            Control::Mute => topic.ends_with(MUTE_SET_SUFFIX),
        });

        let parsed = match control {
            Control::Volume => parse_volume(payload),
            Control::Mute => parse_mute(payload),
        };
        match parsed {
            Ok(action) => {
                debug!("Routed {} on {} to device {}", action, topic, device_id);
                Command::Apply {
                    device_id: device_id.clone(),
                    action,
                }
            }
            Err(e) => {
                warn!("Ignoring message for device {} on {}: {}", device_id, topic, e);
                Command::Noop
            }
        }
    }
}
