//! Port between the session manager and the MQTT client library
//!
//! The session only ever talks to a [`BrokerTransport`] (to open links) and to the
//! [`BrokerLink`] it got back (to subscribe, publish and disconnect). Everything the
//! link observes comes back asynchronously as [`ConnectionEvent`]s on the channel
//! handed to `open`.
//!
//! All link calls are non-blocking requests; none of them waits for the broker.

use super::config::BrokerEndpoint;
use super::message_manager::{ConnectionEvent, Generation};
use rumqttc::QoS;
use thiserror::Error;
use tokio::sync::mpsc;

pub trait BrokerTransport: Send + 'static {
    /// Starts connecting to `endpoint`. Events for this link are sent on `events`
    /// tagged with `generation`.
    fn open(
        &self,
        generation: Generation,
        endpoint: &BrokerEndpoint,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Box<dyn BrokerLink>, TransportError>;
}

pub trait BrokerLink: Send + 'static {
    fn generation(&self) -> Generation;

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError>;

    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Fire-and-forget teardown.
    fn disconnect(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid broker url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported broker url scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("request could not be queued: {0}")]
    Request(String),
}
