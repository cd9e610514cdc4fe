use super::session_manager::ConnectionStatus;
use super::transport::{BrokerLink, TransportError};
use crate::sensor::{SensorKey, TopicRouter};
use rumqttc::QoS;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("no broker connection is established")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Write path back to the broker, borrowing the session's active link.
pub struct CommandPublisher<'a> {
    link: Option<&'a dyn BrokerLink>,
    status: &'a ConnectionStatus,
}

impl<'a> CommandPublisher<'a> {
    pub fn new(link: Option<&'a dyn BrokerLink>, status: &'a ConnectionStatus) -> Self {
        Self { link, status }
    }

    /// Retracts the broker's retained value for `key`.
    ///
    /// Sends an empty payload, at-least-once and retained, so every subscriber sees
    /// the tombstone and later subscribers get nothing replayed.
    pub fn clear(&self, key: &SensorKey) -> Result<(), PublishError> {
        let link = match self.link {
            Some(link) if self.status.accepts_messages() => link,
            _ => return Err(PublishError::NotConnected),
        };

        let topic = TopicRouter::encode(key);
        link.publish(&topic, QoS::AtLeastOnce, true, Vec::new())?;
        info!("Requested clear of {} on {}", key, topic);
        Ok(())
    }
}
