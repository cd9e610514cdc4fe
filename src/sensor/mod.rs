//! # Sensor State Module
//!
//! Turns the raw stream of broker messages into a queryable "latest value per sensor"
//! snapshot. Nothing in here performs I/O: the broker session feeds topics and payload
//! bytes in, the view layer reads snapshots out.
//!
//! ```text
//! sensor/
//! ├── topic_router.rs  - topic string <-> SensorKey
//! ├── category.rs      - closed set of sensor categories, value decoding and formatting
//! ├── store.rs         - SensorStateStore (upsert, tombstone, clear, query)
//! └── error.rs         - TopicError, PayloadError, StoreError
//! ```
//!
//! ## Key Abstractions
//! - **SensorKey**: `instance` + `tag`, both opaque strings taken from the topic
//! - **SensorReading**: the key plus the full decoded JSON record of the last payload
//! - **Tombstone**: an empty payload deletes the key's reading

pub mod category;
pub mod error;
pub mod store;
pub mod topic_router;

pub use category::{SensorCategory, SensorValue};
pub use error::{PayloadError, StoreError, TopicError};
pub use store::{ApplyOutcome, SensorStateStore, TagFilter};
pub use topic_router::{TopicRouter, SUBSCRIPTION_FILTER};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;

/// Identifies one physical sensor channel: which device (`instance`) and what it
/// measures (`tag`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorKey {
    pub instance: String,
    pub tag: String,
}

impl SensorKey {
    pub fn new(instance: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.instance, self.tag)
    }
}

/// Latest decoded payload for a sensor key.
///
/// The key always comes from the topic. The record is kept in full, so `tag` and
/// `instance` copies carried inside the payload are available through
/// [`SensorReading::payload_tag`] and [`SensorReading::payload_instance`] but never
/// used for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    key: SensorKey,
    record: Map<String, Value>,
}

impl SensorReading {
    /// Decodes a non-empty payload as a UTF-8 JSON object.
    pub fn decode(key: SensorKey, payload: &[u8]) -> Result<Self, PayloadError> {
        match serde_json::from_slice::<Value>(payload)? {
            Value::Object(record) => Ok(Self { key, record }),
            other => Err(PayloadError::NotAnObject(json_kind(&other))),
        }
    }

    pub fn key(&self) -> &SensorKey {
        &self.key
    }

    pub fn tag(&self) -> &str {
        &self.key.tag
    }

    pub fn instance(&self) -> &str {
        &self.key.instance
    }

    pub fn record(&self) -> &Map<String, Value> {
        &self.record
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.record.get(name)
    }

    /// Numeric field, `None` when absent or not a number.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.record.get(name).and_then(Value::as_f64)
    }

    /// Boolean field using the loose truthiness sensor firmware relies on:
    /// `true`, non-zero numbers and non-empty strings count as set.
    pub fn flag(&self, name: &str) -> bool {
        match self.record.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
            Some(Value::Null) | None => false,
        }
    }

    pub fn payload_tag(&self) -> Option<&str> {
        self.record.get("tag").and_then(Value::as_str)
    }

    pub fn payload_instance(&self) -> Option<&str> {
        self.record.get("instance").and_then(Value::as_str)
    }

    /// Supply voltage in millivolts.
    pub fn vcc_millivolts(&self) -> Option<f64> {
        self.number("vcc")
    }

    /// Received signal strength in dBm.
    pub fn rssi(&self) -> Option<f64> {
        self.number("rssi")
    }

    pub fn previous_sample_time_micros(&self) -> Option<u64> {
        self.record
            .get("previousSampleTimeMicros")
            .and_then(Value::as_u64)
    }

    /// Event timestamp (`ts`, epoch milliseconds).
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.record
            .get("ts")
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
