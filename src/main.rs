pub mod config;
pub mod console;
pub mod dashboard;
pub mod mqtt;
pub mod persistence;
pub mod sensor;

use crate::config::DashboardSettings;
use crate::dashboard::DashboardHandle;
use crate::mqtt::mqtt_handler::MqttTransport;
use crate::mqtt::config::BrokerSelection;
use crate::persistence::{load_selection_or_default, SelectionWriter, TomlSelectionStore};
use color_eyre::Result;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let (settings, selection_store, selection) = load_startup_state(&config::config_dir());

    info!("Starting dashboard with {}", selection.selected_endpoint());
    let handle = DashboardHandle::spawn(
        &settings,
        selection,
        Box::new(MqttTransport::new(&settings)),
        Box::new(SelectionWriter::spawn(selection_store)),
    );

    console::run(handle, &settings).await?;
    info!("Bye");
    Ok(())
}

// The selection store creates the directory on its first save.
fn load_startup_state(
    config_dir: &Path,
) -> (DashboardSettings, TomlSelectionStore, BrokerSelection) {
    let settings = DashboardSettings::load_or_default(config_dir);
    let selection_store = TomlSelectionStore::in_dir(config_dir);
    info!("Broker selection file: {}", selection_store.path().display());
    let selection = load_selection_or_default(&selection_store);
    (settings, selection_store, selection)
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

// Logs go to stderr; stdout belongs to the console view.
fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .pretty()
        .init();
}
