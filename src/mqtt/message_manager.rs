use std::fmt;

/// Monotonic id of a connection attempt.
///
/// Every link is opened with a fresh generation and stamps it on everything it
/// reports. Events carrying any other generation than the session's current one are
/// stale and get dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a broker link reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake with the broker completed
    Connected,
    /// Subscription acknowledged
    Subscribed,
    /// Inbound publish, payload untouched
    Message { topic: String, payload: Vec<u8> },
    /// Transport-level failure; the transport may still recover on its own
    Failed(String),
    /// Link has stopped for good
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub generation: Generation,
    pub event: LinkEvent,
}

impl ConnectionEvent {
    pub fn new(generation: Generation, event: LinkEvent) -> Self {
        Self { generation, event }
    }

    #[cfg(test)]
    pub fn message(
        generation: Generation,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(
            generation,
            LinkEvent::Message {
                topic: topic.into(),
                payload: payload.into(),
            },
        )
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.event {
            LinkEvent::Message { topic, payload } => {
                write!(
                    f,
                    "{} message on {} ({} bytes)",
                    self.generation,
                    topic,
                    payload.len()
                )
            }
            other => write!(f, "{} {:?}", self.generation, other),
        }
    }
}
