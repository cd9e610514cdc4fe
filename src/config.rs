//! Runtime settings for the dashboard process
//!
//! Read once at startup from `~/.config/sensorboard/settings.toml`. The file is
//! optional and every field has a default, so a missing or partial file still gives a
//! working setup. A file that cannot be read or parsed falls back to the defaults
//! with a warning.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/sensorboard";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    /// Capacity of the channel carrying link events into the dashboard task
    pub event_buffer: usize,
    /// Capacity of the command channel from the view layer
    pub command_buffer: usize,
    /// MQTT keep-alive interval
    pub keep_alive_secs: u64,
    /// Pause between polls after a connection error
    pub reconnect_delay_ms: u64,
    /// How long a torn-down link may keep flushing its DISCONNECT
    pub disconnect_grace_ms: u64,
    /// Minimum time between two console redraws
    pub render_interval_ms: u64,
    pub client_id_prefix: String,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            command_buffer: 32,
            keep_alive_secs: 30,
            reconnect_delay_ms: 2000,
            disconnect_grace_ms: 500,
            render_interval_ms: 1000,
            client_id_prefix: "sensorboard".to_string(),
        }
    }
}

impl DashboardSettings {
    /// Loads `settings.toml` from `dir`, falling back to defaults.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILE);

        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Self::default();
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read {}: {}, using defaults", path.display(), e);
                return Self::default();
            }
        };

        match toml::from_str::<DashboardSettings>(&content) {
            Ok(settings) => {
                info!("Loaded settings from {}", path.display());
                settings.sanitized()
            }
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }

    // tokio channels and intervals panic on zero, rumqttc on keep-alive below 5s
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.event_buffer == 0 {
            warn!("event_buffer must be positive, using {}", defaults.event_buffer);
            self.event_buffer = defaults.event_buffer;
        }
        if self.command_buffer == 0 {
            warn!("command_buffer must be positive, using {}", defaults.command_buffer);
            self.command_buffer = defaults.command_buffer;
        }
        if self.keep_alive_secs < 5 {
            warn!("keep_alive_secs below 5, using 5");
            self.keep_alive_secs = 5;
        }
        if self.render_interval_ms == 0 {
            warn!("render_interval_ms must be positive, using 1");
            self.render_interval_ms = 1;
        }
        self
    }
}

/// `~/.config/sensorboard`, or `./.config/sensorboard` without a home directory.
pub fn config_dir() -> PathBuf {
    let mut path = get_home_dir();
    path.push(CONFIG_DIR);
    path
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
