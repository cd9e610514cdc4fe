//! Error definitions for decoding broker messages into sensor state

use super::SensorKey;
use thiserror::Error;

/// Topic does not have the `/sensor/<instance>/<tag>/state` shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic '{topic}' has {found} segments, expected {expected}")]
    SegmentCount {
        topic: String,
        found: usize,
        expected: usize,
    },
}

/// Non-empty payload that is not a JSON object.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Reasons a message is discarded by the store. The store is never modified when
/// one of these is returned.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("malformed topic: {0}")]
    MalformedTopic(#[from] TopicError),

    #[error("malformed payload for {key}: {source}")]
    MalformedPayload {
        key: SensorKey,
        #[source]
        source: PayloadError,
    },
}
