//! Closed registry of sensor categories
//!
//! Every category knows which tags it covers, how it is labelled, how to pull its
//! value out of a reading and how that value is printed. Adding a category means
//! adding a variant here; the projectors iterate [`SensorCategory::ALL`].
//!
//! The combined measurement tag `m` carries temperature, humidity and pressure in one
//! payload, so it is listed under all three of those categories.

use super::{SensorReading, TagFilter};
use serde_json::Value;
use std::f64::consts::PI;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorCategory {
    Temperature,
    Humidity,
    Pressure,
    TankLevel,
    Current,
    Voltage,
    ElectricEnergy,
    LevelReport,
    Autopilot,
    GatewayStats,
    Motion,
}

impl SensorCategory {
    /// Display order.
    pub const ALL: [SensorCategory; 11] = [
        SensorCategory::Temperature,
        SensorCategory::Humidity,
        SensorCategory::Pressure,
        SensorCategory::TankLevel,
        SensorCategory::Current,
        SensorCategory::Voltage,
        SensorCategory::ElectricEnergy,
        SensorCategory::LevelReport,
        SensorCategory::Autopilot,
        SensorCategory::GatewayStats,
        SensorCategory::Motion,
    ];

    pub fn tags(&self) -> &'static [&'static str] {
        match self {
            SensorCategory::Temperature => &["t", "m"],
            SensorCategory::Humidity => &["h", "m"],
            SensorCategory::Pressure => &["p", "m"],
            SensorCategory::TankLevel => &["w"],
            SensorCategory::Current => &["c"],
            SensorCategory::Voltage => &["v"],
            SensorCategory::ElectricEnergy => &["e"],
            SensorCategory::LevelReport => &["r"],
            SensorCategory::Autopilot => &["b"],
            SensorCategory::GatewayStats => &["s"],
            SensorCategory::Motion => &["k"],
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            SensorCategory::Temperature => "Temperature",
            SensorCategory::Humidity => "Humidity",
            SensorCategory::Pressure => "Pressure",
            SensorCategory::TankLevel => "Tank level",
            SensorCategory::Current => "Current",
            SensorCategory::Voltage => "Voltage",
            SensorCategory::ElectricEnergy => "Electric energy level",
            SensorCategory::LevelReport => "Level Report",
            SensorCategory::Autopilot => "Autopilot",
            SensorCategory::GatewayStats => "RFM69 GW Stats",
            SensorCategory::Motion => "PIR",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorCategory::Temperature => "°C",
            SensorCategory::Humidity => "%H",
            SensorCategory::Pressure => "mbar",
            SensorCategory::TankLevel => "%",
            SensorCategory::Current => "A",
            SensorCategory::Voltage => "V",
            SensorCategory::ElectricEnergy => "Ah",
            SensorCategory::LevelReport
            | SensorCategory::Autopilot
            | SensorCategory::GatewayStats
            | SensorCategory::Motion => "",
        }
    }

    pub fn filter(&self) -> TagFilter {
        TagFilter::any_of(self.tags().iter().copied())
    }

    /// Categories a tag is displayed under. Unknown tags map to none.
    pub fn for_tag(tag: &str) -> impl Iterator<Item = SensorCategory> + '_ {
        Self::ALL
            .into_iter()
            .filter(move |category| category.tags().contains(&tag))
    }

    pub fn decode(&self, reading: &SensorReading) -> SensorValue {
        let unit = self.unit();
        match self {
            SensorCategory::Temperature => SensorValue::number(reading, "temperature", unit),
            SensorCategory::Humidity => SensorValue::number(reading, "humidity", unit),
            SensorCategory::Pressure => SensorValue::number(reading, "pressure", unit),
            SensorCategory::TankLevel => SensorValue::number(reading, "tankLevel", unit),
            SensorCategory::Current => SensorValue::number(reading, "current", unit),
            SensorCategory::ElectricEnergy => SensorValue::number(reading, "ampHours", unit),
            SensorCategory::Voltage => SensorValue::Volts(volts(reading)),
            SensorCategory::LevelReport => SensorValue::Level(reading.field("level").cloned()),
            SensorCategory::Autopilot => SensorValue::Autopilot {
                engaged: reading.flag("enabled"),
                course_degrees: reading.number("course").map(radians_to_degrees),
            },
            SensorCategory::GatewayStats => SensorValue::GatewayStats {
                rssi: reading.field("rssi").cloned(),
                ack_sent: reading.field("ackSent").cloned(),
            },
            SensorCategory::Motion => SensorValue::Motion {
                detected: reading.flag("motionDetected"),
            },
        }
    }
}

impl fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.heading())
    }
}

/// Category-specific value decoded from a reading. `Display` renders it the way the
/// dashboard shows it, unit included.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Number {
        value: Option<f64>,
        unit: &'static str,
    },
    Volts(Option<f64>),
    Level(Option<Value>),
    Autopilot {
        engaged: bool,
        course_degrees: Option<f64>,
    },
    GatewayStats {
        rssi: Option<Value>,
        ack_sent: Option<Value>,
    },
    Motion {
        detected: bool,
    },
}

impl SensorValue {
    fn number(reading: &SensorReading, field: &str, unit: &'static str) -> Self {
        SensorValue::Number {
            value: reading.number(field),
            unit,
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SensorValue::Number {
                value: Some(v),
                unit,
            } => write!(f, "{:.2} {}", v, unit),
            SensorValue::Number { value: None, unit } => write!(f, "N/A {}", unit),
            SensorValue::Volts(Some(v)) => write!(f, "{:.3} V", v),
            SensorValue::Volts(None) => write!(f, "N/A V"),
            SensorValue::Level(Some(level)) => write!(f, "{}", plain(level)),
            SensorValue::Level(None) => write!(f, "-"),
            SensorValue::Autopilot {
                engaged: true,
                course_degrees: Some(course),
            } => write!(f, "Engaged: {}°M", round_half_up(*course)),
            SensorValue::Autopilot {
                engaged: true,
                course_degrees: None,
            } => write!(f, "Engaged"),
            SensorValue::Autopilot { engaged: false, .. } => write!(f, "Disengaged"),
            SensorValue::GatewayStats { rssi, ack_sent } => write!(
                f,
                "{}dB (ACK: {})",
                rssi.as_ref().map(plain).unwrap_or_else(|| "-".to_string()),
                ack_sent.as_ref().map(plain).unwrap_or_else(|| "-".to_string())
            ),
            SensorValue::Motion { detected: true } => write!(f, "Triggered"),
            SensorValue::Motion { detected: false } => write!(f, "Not triggered"),
        }
    }
}

/// Supply voltage in volts. A zero or missing `vcc` means "not reported".
pub fn volts(reading: &SensorReading) -> Option<f64> {
    reading
        .vcc_millivolts()
        .filter(|mv| *mv != 0.0)
        .map(|mv| mv / 1000.0)
}

fn radians_to_degrees(radians: f64) -> f64 {
    radians * 180.0 / PI
}

fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

// Strings without quotes, everything else as JSON.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
