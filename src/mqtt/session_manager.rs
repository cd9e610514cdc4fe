use super::command_publisher::CommandPublisher;
use super::config::{BrokerSelection, CredentialField};
use super::message_manager::{ConnectionEvent, Generation, LinkEvent};
use super::transport::{BrokerLink, BrokerTransport};
use crate::persistence::SelectionStore;
use crate::sensor::{ApplyOutcome, SensorStateStore, SUBSCRIPTION_FILTER};
use rumqttc::QoS;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Connectivity as surfaced to the view layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    /// Handshake done, subscription requested
    Subscribing,
    Subscribed,
    Failed(String),
}

impl ConnectionStatus {
    /// Inbound publishes are only routed to the store in these states.
    pub fn accepts_messages(&self) -> bool {
        matches!(self, ConnectionStatus::Subscribing | ConnectionStatus::Subscribed)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::Subscribing => write!(f, "Subscribing"),
            ConnectionStatus::Subscribed => write!(f, "Subscribed"),
            ConnectionStatus::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("broker index {index} is out of range ({available} brokers configured)")]
    BrokerIndexOutOfRange { index: usize, available: usize },
}

/// What [`BrokerSessionManager::handle_event`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Connection bookkeeping changed
    Status,
    /// Message went through the store
    Applied(ApplyOutcome),
    /// Message from the current link that could not be used
    Discarded,
    /// Event from a superseded link
    Stale,
}

/// Owns the sensor store and the one active broker link.
///
/// Every link is opened under a fresh [`Generation`]. Teardown of the previous link is
/// only requested, never awaited; whatever it still reports afterwards carries an old
/// generation and is dropped in [`handle_event`](Self::handle_event).
pub struct BrokerSessionManager {
    selection: BrokerSelection,
    store: SensorStateStore,
    transport: Box<dyn BrokerTransport>,
    persistence: Box<dyn SelectionStore>,
    events: mpsc::Sender<ConnectionEvent>,
    generation: Generation,
    link: Option<Box<dyn BrokerLink>>,
    status: ConnectionStatus,
    selection_revision: u64,
}

impl BrokerSessionManager {
    pub fn new(
        selection: BrokerSelection,
        transport: Box<dyn BrokerTransport>,
        persistence: Box<dyn SelectionStore>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            selection,
            store: SensorStateStore::new(),
            transport,
            persistence,
            events,
            generation: Generation::default(),
            link: None,
            status: ConnectionStatus::Disconnected,
            selection_revision: 0,
        }
    }

    /// Connects to the selected broker without touching the persisted selection.
    pub fn start(&mut self) {
        info!("Starting session with {}", self.selection.selected_endpoint());
        self.teardown();
        self.connect();
    }

    pub fn select_broker(&mut self, index: usize) -> Result<(), SessionError> {
        let available = self.selection.brokers().len();
        if index >= available {
            return Err(SessionError::BrokerIndexOutOfRange { index, available });
        }

        self.teardown();
        self.store.clear();
        self.selection.select(index);
        self.selection_revision += 1;
        info!("Selected broker {}", self.selection.selected_endpoint());
        self.persist();
        self.connect();
        Ok(())
    }

    /// Takes effect on the next connect; the active link keeps its old credentials.
    pub fn update_credential(&mut self, field: CredentialField, value: String) {
        self.selection.set_credential(field, value);
        self.selection_revision += 1;
        info!(
            "Updated {} for {}, applies on next connect",
            field,
            self.selection.selected_endpoint().name
        );
        self.persist();
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) -> EventOutcome {
        let Some(link) = self.link.as_ref() else {
            debug!("Ignoring {} without an active link", event);
            return EventOutcome::Stale;
        };
        if event.generation != self.generation {
            debug!("Ignoring stale {} (current {})", event, self.generation);
            return EventOutcome::Stale;
        }

        match event.event {
            LinkEvent::Connected => {
                // Retained state from before a transport-level reconnect is replayed
                // after the new subscription.
                if matches!(self.status, ConnectionStatus::Failed(_)) {
                    self.store.clear();
                }
                info!("Connected {}, subscribing to {}", self.generation, SUBSCRIPTION_FILTER);
                self.status = match link.subscribe(SUBSCRIPTION_FILTER, QoS::AtMostOnce) {
                    Ok(()) => ConnectionStatus::Subscribing,
                    Err(e) => {
                        warn!("Subscribe request failed: {}", e);
                        ConnectionStatus::Failed(e.to_string())
                    }
                };
                EventOutcome::Status
            }
            LinkEvent::Subscribed => {
                info!("Subscribed to {}", SUBSCRIPTION_FILTER);
                self.status = ConnectionStatus::Subscribed;
                EventOutcome::Status
            }
            LinkEvent::Message { topic, payload } => {
                if !self.status.accepts_messages() {
                    debug!("Dropping message on {} while {}", topic, self.status);
                    return EventOutcome::Discarded;
                }
                match self.store.apply_message(&topic, &payload) {
                    Ok(outcome) => EventOutcome::Applied(outcome),
                    Err(e) => {
                        warn!("Discarding message on {}: {}", topic, e);
                        EventOutcome::Discarded
                    }
                }
            }
            LinkEvent::Failed(reason) => {
                warn!("Connection {} failed: {}", self.generation, reason);
                self.status = ConnectionStatus::Failed(reason);
                EventOutcome::Status
            }
            LinkEvent::Closed => {
                info!("Connection {} closed", self.generation);
                self.link = None;
                self.status = ConnectionStatus::Disconnected;
                EventOutcome::Status
            }
        }
    }

    pub fn command_publisher(&self) -> CommandPublisher<'_> {
        CommandPublisher::new(self.link.as_deref(), &self.status)
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down broker session");
        self.teardown();
        self.store.clear();
    }

    pub fn store(&self) -> &SensorStateStore {
        &self.store
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn selection(&self) -> &BrokerSelection {
        &self.selection
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Bumped on every selection or credential change.
    pub fn selection_revision(&self) -> u64 {
        self.selection_revision
    }

    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("Requesting teardown of connection {}", link.generation());
            link.disconnect();
        }
        self.status = ConnectionStatus::Disconnected;
    }

    fn connect(&mut self) {
        self.generation = self.generation.next();
        let endpoint = self.selection.selected_endpoint();

        match self
            .transport
            .open(self.generation, endpoint, self.events.clone())
        {
            Ok(link) => {
                info!("Connecting {} to {}", self.generation, endpoint);
                self.link = Some(link);
                self.status = ConnectionStatus::Connecting;
            }
            Err(e) => {
                error!("Could not open connection to {}: {}", endpoint, e);
                self.status = ConnectionStatus::Failed(e.to_string());
            }
        }
    }

    fn persist(&self) {
        if let Err(e) = self.persistence.save(&self.selection) {
            error!("Failed to persist broker selection: {}", e);
        }
    }
}
