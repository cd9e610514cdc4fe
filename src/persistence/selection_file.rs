use super::{PersistenceError, SelectionStore};
use crate::mqtt::config::BrokerSelection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SELECTION_FILE: &str = "broker_selection.toml";

/// Broker selection stored as `broker_selection.toml`.
///
/// ```toml
/// selected = 0
///
/// [[brokers]]
/// name = "Haukkakallio"
/// url = "wss://haukkakallio.chacal.fi:9883"
/// username = ""
/// password = ""
/// ```
#[derive(Debug, Clone)]
pub struct TomlSelectionStore {
    path: PathBuf,
}

impl TomlSelectionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at `<dir>/broker_selection.toml`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SELECTION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_err(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl SelectionStore for TomlSelectionStore {
    fn load(&self) -> Result<Option<BrokerSelection>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let selection: BrokerSelection =
            toml::from_str(&content).map_err(|source| PersistenceError::Parse {
                path: self.path.clone(),
                source,
            })?;

        selection
            .validated()
            .map(Some)
            .map_err(PersistenceError::Invalid)
    }

    /// Writes to a temporary sibling first and renames it over the old file.
    fn save(&self, selection: &BrokerSelection) -> Result<(), PersistenceError> {
        let content = toml::to_string_pretty(selection)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.write_err(e))?;
        }

        let tmp_path = self.path.with_extension("toml.tmp");
        fs::write(&tmp_path, content).map_err(|e| self.write_err(e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| self.write_err(e))?;

        debug!("Saved broker selection to {}", self.path.display());
        Ok(())
    }
}
