use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One configured MQTT broker.
///
/// An empty `username` means the connection is opened without credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    /// Label shown in the broker picker
    pub name: String,
    /// Broker URL, e.g. `wss://broker.example.com:9883`
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl BrokerEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            username: String::new(),
            password: String::new(),
        }
    }

    /// `(username, password)` when a username is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    /// Password is never printed.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.username.is_empty() {
            write!(f, "{} ({})", self.name, self.url)
        } else {
            write!(f, "{} ({}@{})", self.name, self.username, self.url)
        }
    }
}

/// Which credential of the selected broker an edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Username,
    Password,
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CredentialField::Username => write!(f, "username"),
            CredentialField::Password => write!(f, "password"),
        }
    }
}

/// Why a broker selection cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("broker list is empty")]
    NoBrokers,

    #[error("selected index {selected} is out of range ({available} brokers)")]
    SelectedOutOfRange { selected: usize, available: usize },
}

/// Ordered broker list plus the selected index.
///
/// Invariant: `brokers` is non-empty and `selected < brokers.len()`. Values coming
/// from disk go through [`BrokerSelection::validated`] before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSelection {
    selected: usize,
    brokers: Vec<BrokerEndpoint>,
}

impl Default for BrokerSelection {
    fn default() -> Self {
        Self {
            selected: 0,
            brokers: vec![
                BrokerEndpoint::new("Haukkakallio", "wss://haukkakallio.chacal.fi:9883"),
                BrokerEndpoint::new("Freya", "ws://freya-raspi.chacal.fi:9883"),
            ],
        }
    }
}

impl BrokerSelection {
    #[cfg(test)]
    pub fn new(brokers: Vec<BrokerEndpoint>, selected: usize) -> Result<Self, SelectionError> {
        Self { selected, brokers }.validated()
    }

    /// Checks the invariant.
    pub fn validated(self) -> Result<Self, SelectionError> {
        if self.brokers.is_empty() {
            return Err(SelectionError::NoBrokers);
        }
        if self.selected >= self.brokers.len() {
            return Err(SelectionError::SelectedOutOfRange {
                selected: self.selected,
                available: self.brokers.len(),
            });
        }
        Ok(self)
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn brokers(&self) -> &[BrokerEndpoint] {
        &self.brokers
    }

    pub fn selected_endpoint(&self) -> &BrokerEndpoint {
        &self.brokers[self.selected]
    }

    /// Moves the selection. Returns `false` and leaves the selection alone when
    /// `index` is out of range.
    pub fn select(&mut self, index: usize) -> bool {
        if index < self.brokers.len() {
            self.selected = index;
            true
        } else {
            false
        }
    }

    /// Edits a credential of the selected broker.
    pub fn set_credential(&mut self, field: CredentialField, value: String) {
        let endpoint = &mut self.brokers[self.selected];
        match field {
            CredentialField::Username => endpoint.username = value,
            CredentialField::Password => endpoint.password = value,
        }
    }
}
