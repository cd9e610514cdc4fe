//! # Dashboard Module
//!
//! Runs the [`BrokerSessionManager`] inside one tokio task and exposes it to view
//! layers. Commands go in through a [`DashboardHandle`]; state comes out as immutable
//! [`DashboardView`] snapshots on a `watch` channel, so renderers never hold a
//! reference into live state.

pub mod dashboard_handle;

use crate::mqtt::config::BrokerEndpoint;
use crate::mqtt::message_manager::Generation;
use crate::mqtt::session_manager::{BrokerSessionManager, ConnectionStatus};
use crate::sensor::{SensorReading, TagFilter};
use std::sync::Arc;

pub use dashboard_handle::{DashboardCommand, DashboardError, DashboardHandle};

/// Point-in-time copy of everything a view needs.
#[derive(Debug, Clone, Default)]
pub struct DashboardView {
    pub status: ConnectionStatus,
    pub generation: Generation,
    pub selected: usize,
    pub brokers: Vec<BrokerEndpoint>,
    /// Store revision this view was taken at
    pub revision: u64,
    /// All readings in display order (instance, then tag)
    pub readings: Arc<Vec<SensorReading>>,
}

impl DashboardView {
    pub fn capture(manager: &BrokerSessionManager) -> Self {
        let selection = manager.selection();
        Self {
            status: manager.status().clone(),
            generation: manager.generation(),
            selected: selection.selected(),
            brokers: selection.brokers().to_vec(),
            revision: manager.store().revision(),
            readings: Arc::new(manager.store().snapshot()),
        }
    }

    /// Same result as the store query at capture time.
    pub fn query(&self, filter: &TagFilter) -> Vec<&SensorReading> {
        self.readings
            .iter()
            .filter(|reading| filter.matches(reading.tag()))
            .collect()
    }

    pub fn selected_broker(&self) -> Option<&BrokerEndpoint> {
        self.brokers.get(self.selected)
    }
}
