//! Terminal view of the dashboard
//!
//! Redraws the sensor tables whenever a new [`DashboardView`] is published (at most
//! once per `render_interval`) and reads one command per line from stdin.

use crate::config::DashboardSettings;
use crate::dashboard::{DashboardHandle, DashboardView};
use crate::mqtt::config::CredentialField;
use crate::sensor::category::volts;
use crate::sensor::{SensorCategory, SensorKey, SensorReading};
use chrono::Local;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::fmt;
use std::io::BufRead;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const HELP: &str = "Commands: select <index> | user <name> | password <secret> | \
clear <instance> <tag> | show | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Select(usize),
    Credential(CredentialField, String),
    Clear(SensorKey),
    Show,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("'{0}' is missing its argument")]
    MissingArgument(&'static str),

    #[error("'{0}' is not a broker index")]
    InvalidIndex(String),
}

/// Parses one input line.
///
/// Credential values run to the end of the line; `user` without a value clears the
/// username.
pub fn parse_command(line: &str) -> Result<ConsoleCommand, CommandParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word {
        "" => Err(CommandParseError::Empty),
        "select" => {
            if rest.is_empty() {
                return Err(CommandParseError::MissingArgument("select"));
            }
            rest.parse()
                .map(ConsoleCommand::Select)
                .map_err(|_| CommandParseError::InvalidIndex(rest.to_string()))
        }
        "user" => Ok(ConsoleCommand::Credential(
            CredentialField::Username,
            rest.to_string(),
        )),
        "password" => Ok(ConsoleCommand::Credential(
            CredentialField::Password,
            rest.to_string(),
        )),
        "clear" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(instance), Some(tag), None) => {
                    Ok(ConsoleCommand::Clear(SensorKey::new(instance, tag)))
                }
                _ => Err(CommandParseError::MissingArgument("clear")),
            }
        }
        "show" => Ok(ConsoleCommand::Show),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(CommandParseError::Unknown(other.to_string())),
    }
}

/// Renders the whole screen for one view.
pub fn render(view: &DashboardView) -> String {
    Screen(view).to_string()
}

struct Screen<'a>(&'a DashboardView);

impl fmt::Display for Screen<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let view = self.0;
        writeln!(f, "Sensors")?;
        for (index, broker) in view.brokers.iter().enumerate() {
            let marker = if index == view.selected { '*' } else { ' ' };
            writeln!(f, " {}{} {}", marker, index, broker)?;
        }
        writeln!(f, "Status: {} ({})", view.status, view.generation)?;

        for category in SensorCategory::ALL {
            let readings = view.query(&category.filter());
            if readings.is_empty() {
                continue;
            }
            writeln!(f)?;
            writeln!(f, "{}", category.heading())?;
            for reading in readings {
                writeln!(f, "{}", render_row(category, reading))?;
            }
        }
        Ok(())
    }
}

fn render_row(category: SensorCategory, reading: &SensorReading) -> String {
    let vcc = match volts(reading) {
        Some(v) => format!("{:.3} V", v),
        None => "N/A V".to_string(),
    };
    let rssi = match reading.rssi() {
        Some(rssi) if rssi != 0.0 => format!("{} dBm", rssi),
        _ => "-".to_string(),
    };
    let time = reading
        .timestamp()
        .map(|ts| ts.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "  {:<12} {:<18} {:>9} {:>9} {:>9}  [{}]",
        reading.instance(),
        category.decode(reading).to_string(),
        vcc,
        rssi,
        time,
        reading.tag()
    )
}

/// Drives the terminal until `quit`, end of input or Ctrl-C, then shuts the
/// dashboard down.
pub async fn run(handle: DashboardHandle, settings: &DashboardSettings) -> Result<()> {
    let mut views = handle.subscribe();
    let mut lines = spawn_stdin_reader();
    let mut ticker = tokio::time::interval(settings.render_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("{}", HELP);
    let mut dirty = true;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    warn!("Dashboard stopped publishing views");
                    break;
                }
                dirty = true;
            }
            _ = ticker.tick() => {
                if dirty {
                    let view = views.borrow_and_update().clone();
                    print!("{}", render(&view));
                    dirty = false;
                }
            }
            line = lines.recv() => {
                let Some(line) = line else {
                    info!("Input closed, shutting down");
                    break;
                };
                match parse_command(&line) {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(ConsoleCommand::Show) => dirty = true,
                    Ok(command) => execute(&handle, command).await,
                    Err(CommandParseError::Empty) => {}
                    Err(e) => println!("{}. {}", e, HELP),
                }
            }
        }
    }

    handle
        .shutdown()
        .await
        .map_err(|e| eyre!("Dashboard shutdown failed: {}", e))
}

async fn execute(handle: &DashboardHandle, command: ConsoleCommand) {
    let result = match command {
        ConsoleCommand::Select(index) => handle.select_broker(index).await,
        ConsoleCommand::Credential(field, value) => handle.update_credential(field, value).await,
        ConsoleCommand::Clear(key) => handle.clear_sensor(key).await,
        ConsoleCommand::Show | ConsoleCommand::Quit => Ok(()),
    };
    if let Err(e) = result {
        println!("Error: {}", e);
    }
}

// Plain thread; the runtime does not wait for it on exit.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Stopped reading stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
