//! In-memory stand-ins for the broker transport and the selection store.

use super::config::{BrokerEndpoint, BrokerSelection};
use super::message_manager::{ConnectionEvent, Generation};
use super::transport::{BrokerLink, BrokerTransport, TransportError};
use crate::persistence::{PersistenceError, SelectionStore};
use rumqttc::QoS;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Everything one fake link was asked to do.
#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub generation: Generation,
    pub endpoint: BrokerEndpoint,
    pub events: mpsc::Sender<ConnectionEvent>,
    pub subscriptions: Vec<(String, QoS)>,
    pub publishes: Vec<(String, QoS, bool, Vec<u8>)>,
    pub disconnected: bool,
}

#[derive(Default)]
struct TransportState {
    links: Vec<LinkRecord>,
    refuse_open: Option<String>,
    reject_requests: Option<String>,
}

/// Records opened links; tests drive them by sending on each link's `events`.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    /// Every `open` fails with `reason`.
    pub fn refusing(reason: &str) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().refuse_open = Some(reason.to_string());
        transport
    }

    /// Subscribe and publish requests fail from now on.
    pub fn reject_requests(&self, reason: &str) {
        self.state.lock().unwrap().reject_requests = Some(reason.to_string());
    }

    pub fn links(&self) -> Vec<LinkRecord> {
        self.state.lock().unwrap().links.clone()
    }

    pub fn link(&self, generation: Generation) -> Option<LinkRecord> {
        self.links()
            .into_iter()
            .find(|record| record.generation == generation)
    }
}

impl BrokerTransport for FakeTransport {
    fn open(
        &self,
        generation: Generation,
        endpoint: &BrokerEndpoint,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Box<dyn BrokerLink>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.refuse_open {
            return Err(TransportError::Request(reason.clone()));
        }
        state.links.push(LinkRecord {
            generation,
            endpoint: endpoint.clone(),
            events,
            subscriptions: Vec::new(),
            publishes: Vec::new(),
            disconnected: false,
        });
        Ok(Box::new(FakeLink {
            generation,
            index: state.links.len() - 1,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeLink {
    generation: Generation,
    index: usize,
    state: Arc<Mutex<TransportState>>,
}

impl FakeLink {
    fn record<F>(&self, update: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut LinkRecord),
    {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.reject_requests {
            return Err(TransportError::Request(reason.clone()));
        }
        update(&mut state.links[self.index]);
        Ok(())
    }
}

impl BrokerLink for FakeLink {
    fn generation(&self) -> Generation {
        self.generation
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        self.record(|link| link.subscriptions.push((filter.to_string(), qos)))
    }

    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.record(|link| link.publishes.push((topic.to_string(), qos, retain, payload)))
    }

    fn disconnect(&self) {
        self.state.lock().unwrap().links[self.index].disconnected = true;
    }
}

#[derive(Default)]
struct StoreState {
    current: Option<BrokerSelection>,
    saved: Vec<BrokerSelection>,
    failing: bool,
}

/// Selection store that keeps every save for inspection.
#[derive(Clone, Default)]
pub struct MemorySelectionStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemorySelectionStore {
    pub fn with_initial(selection: BrokerSelection) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().current = Some(selection);
        store
    }

    /// Both load and save fail.
    pub fn failing() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().failing = true;
        store
    }

    pub fn saved(&self) -> Vec<BrokerSelection> {
        self.state.lock().unwrap().saved.clone()
    }
}

impl SelectionStore for MemorySelectionStore {
    fn load(&self) -> Result<Option<BrokerSelection>, PersistenceError> {
        let state = self.state.lock().unwrap();
        if state.failing {
            return Err(unavailable());
        }
        Ok(state.current.clone())
    }

    fn save(&self, selection: &BrokerSelection) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(unavailable());
        }
        state.current = Some(selection.clone());
        state.saved.push(selection.clone());
        Ok(())
    }
}

fn unavailable() -> PersistenceError {
    PersistenceError::Write {
        path: PathBuf::from("memory"),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "store unavailable"),
    }
}
