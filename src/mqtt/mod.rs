//! # MQTT Integration Module
//!
//! Owns everything between the sensor store and the broker: which broker is selected,
//! the live connection to it, and the single write path back (clearing a sensor).
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs            - Broker endpoints and the persisted selection
//! ├── message_manager.rs   - Generation ids and connection events
//! ├── transport.rs         - Port to the MQTT client library
//! ├── mqtt_handler.rs      - rumqttc implementation of the port
//! ├── session_manager.rs   - Connection bookkeeping, generation guard, dispatch
//! └── command_publisher.rs - Retained clear messages
//! ```
//!
//! ## Connection Lifecycle
//!
//! `Disconnected → Connecting → Subscribing → Subscribed`, back to `Disconnected` on
//! teardown. A broker switch never waits for the old link to close. The session bumps
//! its generation instead and drops anything the old link still reports.

pub mod command_publisher;
pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod session_manager;
pub mod transport;

#[cfg(test)]
pub mod testing;
