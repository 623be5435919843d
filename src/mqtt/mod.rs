//! # MQTT integration
//!
//! Everything that speaks to the broker or shapes what goes over it.
//!
//! ```text
//! mqtt/
//! ├── config.rs        - broker and Home Assistant settings
//! ├── topics.rs        - per-device topic set
//! ├── discovery.rs     - Home Assistant discovery documents
//! ├── router.rs        - inbound topic+payload to device command
//! ├── publisher.rs     - non-blocking outbound publish seam
//! └── mqtt_handler.rs  - rumqttc event loop, connect/reconnect, last will
//! ```
//!
//! Devices only ever see the [`publisher::Publisher`] trait, and the router
//! never sees the broker, so both are testable without a connection.

pub mod config;
pub mod discovery;
pub mod mqtt_handler;
pub mod publisher;
pub mod router;
pub mod topics;
