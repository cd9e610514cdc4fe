//! Mapping between broker topics and sensor keys
//!
//! ```text
//! /sensor/<instance>/<tag>/state
//!  │      │          │     └── fixed suffix
//!  │      │          └──────── segment 3
//!  │      └─────────────────── segment 2
//!  └────────────────────────── segment 0 is empty (leading '/')
//! ```

use super::{SensorKey, TopicError};

/// Wildcard filter the session subscribes to.
pub const SUBSCRIPTION_FILTER: &str = "/sensor/+/+/state";

const TOPIC_SEPARATOR: char = '/';
const SEGMENT_COUNT: usize = 5;
const INSTANCE_SEGMENT: usize = 2;
const TAG_SEGMENT: usize = 3;

pub struct TopicRouter;

impl TopicRouter {
    /// Extracts the sensor key positionally. Only the segment count is checked; the
    /// segment values are opaque.
    pub fn decode(topic: &str) -> Result<SensorKey, TopicError> {
        let segments: Vec<&str> = topic.split(TOPIC_SEPARATOR).collect();

        if segments.len() != SEGMENT_COUNT {
            return Err(TopicError::SegmentCount {
                topic: topic.to_string(),
                found: segments.len(),
                expected: SEGMENT_COUNT,
            });
        }

        Ok(SensorKey::new(
            segments[INSTANCE_SEGMENT],
            segments[TAG_SEGMENT],
        ))
    }

    /// State topic addressing `key`, used for the retained clear message.
    pub fn encode(key: &SensorKey) -> String {
        format!("/sensor/{}/{}/state", key.instance, key.tag)
    }
}
