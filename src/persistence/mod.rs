//! # Persistence Module
//!
//! Keeps the broker selection (endpoint list, credentials and selected index) across
//! restarts. The session manager talks to a [`SelectionStore`] port after every
//! committed change to the selection; production uses the TOML file store behind a
//! [`SelectionWriter`] so file I/O stays off the dashboard task, tests plug in an
//! in-memory fake.
//!
//! ## Error Handling Strategy
//! Loading never prevents startup: a missing, unreadable or invalid file degrades to
//! the built-in broker list (see [`load_selection_or_default`]). Save failures are
//! reported to the caller, which logs them and keeps running on the in-memory state.

pub mod persistence_worker;
pub mod selection_file;

use crate::mqtt::config::{BrokerSelection, SelectionError};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

pub use persistence_worker::SelectionWriter;
pub use selection_file::TomlSelectionStore;

/// Durable home of the [`BrokerSelection`].
pub trait SelectionStore: Send + 'static {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<BrokerSelection>, PersistenceError>;

    fn save(&self, selection: &BrokerSelection) -> Result<(), PersistenceError>;
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize broker selection: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("stored broker selection is invalid: {0}")]
    Invalid(#[from] SelectionError),

    #[error("selection writer has stopped")]
    WriterStopped,
}

/// Startup load with fallback to the built-in broker list.
pub fn load_selection_or_default(store: &dyn SelectionStore) -> BrokerSelection {
    match store.load() {
        Ok(Some(selection)) => {
            info!(
                "Restored broker selection: {} ({} brokers)",
                selection.selected_endpoint(),
                selection.brokers().len()
            );
            selection
        }
        Ok(None) => {
            info!("No stored broker selection, using built-in brokers");
            BrokerSelection::default()
        }
        Err(e) => {
            warn!("Could not load broker selection: {}, using built-in brokers", e);
            BrokerSelection::default()
        }
    }
}
