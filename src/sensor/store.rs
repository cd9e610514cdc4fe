//! In-memory latest-value store
//!
//! Holds at most one [`SensorReading`] per [`SensorKey`]. A new payload replaces the
//! previous reading wholesale, an empty payload deletes it, and [`SensorStateStore::clear`]
//! drops everything when the broker connection changes. Queries hand out owned,
//! sorted snapshots.

use super::{SensorCategory, SensorKey, SensorReading, StoreError, TopicRouter};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// What `apply_message` did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Reading inserted or replaced
    Upserted,
    /// Tombstone removed an existing reading
    Deleted,
    /// Tombstone for an unknown key, or a payload identical to the stored one
    Unchanged,
}

/// Tag predicate for [`SensorStateStore::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    All,
    Single(String),
    AnyOf(Vec<String>),
}

impl TagFilter {
    pub fn single(tag: impl Into<String>) -> Self {
        TagFilter::Single(tag.into())
    }

    pub fn any_of<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TagFilter::AnyOf(tags.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, tag: &str) -> bool {
        match self {
            TagFilter::All => true,
            TagFilter::Single(wanted) => wanted == tag,
            TagFilter::AnyOf(wanted) => wanted.iter().any(|t| t == tag),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SensorStateStore {
    readings: HashMap<SensorKey, SensorReading>,
    revision: u64,
}

impl SensorStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one broker message.
    ///
    /// Errors mean the message was discarded; the store is left untouched in that case.
    pub fn apply_message(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> Result<ApplyOutcome, StoreError> {
        let key = TopicRouter::decode(topic)?;

        if payload.is_empty() {
            return Ok(match self.readings.remove(&key) {
                Some(_) => {
                    self.bump();
                    ApplyOutcome::Deleted
                }
                None => ApplyOutcome::Unchanged,
            });
        }

        let reading = SensorReading::decode(key.clone(), payload).map_err(|source| {
            StoreError::MalformedPayload {
                key: key.clone(),
                source,
            }
        })?;
        note_unusual(&reading);

        if self.readings.get(&key) == Some(&reading) {
            return Ok(ApplyOutcome::Unchanged);
        }

        self.readings.insert(key, reading);
        self.bump();
        Ok(ApplyOutcome::Upserted)
    }

    pub fn clear(&mut self) {
        if !self.readings.is_empty() {
            self.readings.clear();
            self.bump();
        }
    }

    /// Readings whose tag satisfies `filter`, sorted by instance.
    pub fn query(&self, filter: &TagFilter) -> Vec<SensorReading> {
        let mut selected: Vec<SensorReading> = self
            .readings
            .values()
            .filter(|reading| filter.matches(reading.tag()))
            .cloned()
            .collect();
        selected.sort_by(compare_readings);
        selected
    }

    /// Every reading, sorted by instance.
    pub fn snapshot(&self) -> Vec<SensorReading> {
        self.query(&TagFilter::All)
    }

    pub fn get(&self, key: &SensorKey) -> Option<&SensorReading> {
        self.readings.get(key)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Incremented on every change of contents.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

/// Display order: by instance, then tag.
// Topic key wins over payload copies; disagreements only get logged.
fn note_unusual(reading: &SensorReading) {
    let key = reading.key();
    if let Some(tag) = reading.payload_tag().filter(|tag| *tag != key.tag) {
        debug!("Payload tag '{}' disagrees with topic {}", tag, key);
    }
    if let Some(instance) = reading
        .payload_instance()
        .filter(|instance| *instance != key.instance)
    {
        debug!("Payload instance '{}' disagrees with topic {}", instance, key);
    }
    if SensorCategory::for_tag(&key.tag).next().is_none() {
        debug!("Tag '{}' is not shown in any category", key.tag);
    }
}

pub fn compare_readings(a: &SensorReading, b: &SensorReading) -> Ordering {
    compare_instances(a.instance(), b.instance()).then_with(|| a.tag().cmp(b.tag()))
}

/// Numeric instances compare by value, everything else lexicographically.
/// Numeric instances sort before non-numeric ones so the order stays total.
pub fn compare_instances(a: &str, b: &str) -> Ordering {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn numeric(instance: &str) -> Option<f64> {
    instance.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1_TEMPERATURE: &str =
        r#"{"tag":"t","instance":"s1","temperature":21.5,"ts":1690000000000}"#;

    fn topic(instance: &str, tag: &str) -> String {
        format!("/sensor/{instance}/{tag}/state")
    }

    fn apply(store: &mut SensorStateStore, instance: &str, tag: &str, payload: &str) {
        store
            .apply_message(&topic(instance, tag), payload.as_bytes())
            .unwrap();
    }

    #[test]
    fn stores_reading_and_queries_by_tag() {
        let mut store = SensorStateStore::new();
        let outcome = store
            .apply_message("/sensor/s1/t/state", S1_TEMPERATURE.as_bytes())
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Upserted);

        let result = store.query(&TagFilter::single("t"));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].instance(), "s1");
        assert_eq!(result[0].number("temperature"), Some(21.5));
    }

    #[test]
    fn empty_payload_deletes_reading() {
        let mut store = SensorStateStore::new();
        apply(&mut store, "s1", "t", S1_TEMPERATURE);

        let outcome = store.apply_message("/sensor/s1/t/state", b"").unwrap();
        assert_eq!(outcome, ApplyOutcome::Deleted);
        assert!(store.query(&TagFilter::single("t")).is_empty());
    }

    #[test]
    fn deleting_unknown_key_is_a_no_op() {
        let mut store = SensorStateStore::new();
        apply(&mut store, "s1", "t", S1_TEMPERATURE);
        let before = store.clone();

        let outcome = store.apply_message("/sensor/s2/t/state", b"").unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(store, before);
    }

    #[test]
    fn new_payload_replaces_wholesale() {
        let mut store = SensorStateStore::new();
        apply(&mut store, "s1", "m", r#"{"temperature":20.0,"humidity":40.0}"#);
        apply(&mut store, "s1", "m", r#"{"temperature":22.0}"#);

        let reading = store.get(&SensorKey::new("s1", "m")).unwrap();
        assert_eq!(reading.number("temperature"), Some(22.0));
        assert_eq!(reading.number("humidity"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unparsable_payload_leaves_store_unchanged() {
        let mut store = SensorStateStore::new();
        apply(&mut store, "s1", "t", S1_TEMPERATURE);
        let before = store.clone();

        for bad in [&b"{not json"[..], &b"42"[..], &b"\xff\xfe"[..], &b"\"text\""[..]] {
            let err = store.apply_message("/sensor/s1/t/state", bad).unwrap_err();
            assert!(matches!(err, StoreError::MalformedPayload { .. }));
        }
        assert_eq!(store, before);
    }

    #[test]
    fn malformed_topic_is_rejected() {
        let mut store = SensorStateStore::new();
        let err = store
            .apply_message("/sensor/s1/state", S1_TEMPERATURE.as_bytes())
            .unwrap_err();
        assert!(matches!(err, StoreError::MalformedTopic(_)));
        assert!(store.is_empty());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn applying_same_message_twice_is_idempotent() {
        let mut once = SensorStateStore::new();
        apply(&mut once, "s1", "t", S1_TEMPERATURE);

        let mut twice = SensorStateStore::new();
        apply(&mut twice, "s1", "t", S1_TEMPERATURE);
        let outcome = twice
            .apply_message("/sensor/s1/t/state", S1_TEMPERATURE.as_bytes())
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(once, twice);
    }

    #[test]
    fn clear_empties_store() {
        let mut store = SensorStateStore::new();
        apply(&mut store, "s1", "t", S1_TEMPERATURE);
        apply(&mut store, "s2", "h", r#"{"humidity":55}"#);

        store.clear();
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn tombstone_then_recreate_restores_reading() {
        let mut store = SensorStateStore::new();
        apply(&mut store, "s1", "t", r#"{"temperature":1.0}"#);
        store.apply_message("/sensor/s1/t/state", b"").unwrap();
        apply(&mut store, "s1", "t", S1_TEMPERATURE);

        let expected =
            SensorReading::decode(SensorKey::new("s1", "t"), S1_TEMPERATURE.as_bytes()).unwrap();
        assert_eq!(store.get(&SensorKey::new("s1", "t")), Some(&expected));
    }

    #[test]
    fn result_is_independent_of_unrelated_interleaving() {
        let a1 = ("a", "t", r#"{"temperature":1}"#);
        let a2 = ("a", "t", r#"{"temperature":2}"#);
        let b1 = ("b", "h", r#"{"humidity":10}"#);
        let b_del = ("b", "h", "");
        let c1 = ("c", "p", r#"{"pressure":1000}"#);

        let orders = [
            vec![a1, a2, b1, b_del, c1],
            vec![b1, a1, c1, b_del, a2],
            vec![c1, b1, b_del, a1, a2],
        ];

        let stores: Vec<SensorStateStore> = orders
            .iter()
            .map(|order| {
                let mut store = SensorStateStore::new();
                for (instance, tag, payload) in order {
                    apply(&mut store, instance, tag, payload);
                }
                store
            })
            .collect();

        for store in &stores {
            assert_eq!(store.snapshot(), stores[0].snapshot());
        }
        let snapshot = stores[0].snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].number("temperature"), Some(2.0));
        assert_eq!(snapshot[1].instance(), "c");
    }

    #[test]
    fn query_sorts_by_instance() {
        let mut store = SensorStateStore::new();
        for instance in ["10", "9", "beta", "alpha", "1a"] {
            apply(&mut store, instance, "t", "{}");
        }
        apply(&mut store, "9", "m", "{}");

        let order: Vec<(String, String)> = store
            .query(&TagFilter::any_of(["t", "m"]))
            .iter()
            .map(|r| (r.instance().to_string(), r.tag().to_string()))
            .collect();

        let expected: Vec<(String, String)> = [
            ("9", "m"),
            ("9", "t"),
            ("10", "t"),
            ("1a", "t"),
            ("alpha", "t"),
            ("beta", "t"),
        ]
        .iter()
        .map(|(i, t)| (i.to_string(), t.to_string()))
        .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn query_returns_snapshot() {
        let mut store = SensorStateStore::new();
        apply(&mut store, "s1", "t", S1_TEMPERATURE);

        let snapshot = store.query(&TagFilter::single("t"));
        store.clear();

        assert_eq!(snapshot.len(), 1);
        assert!(store.query(&TagFilter::single("t")).is_empty());
    }

    #[test]
    fn revision_tracks_content_changes() {
        let mut store = SensorStateStore::new();
        apply(&mut store, "s1", "t", S1_TEMPERATURE);
        assert_eq!(store.revision(), 1);

        apply(&mut store, "s1", "t", S1_TEMPERATURE);
        assert_eq!(store.revision(), 1);

        store.apply_message("/sensor/s1/t/state", b"").unwrap();
        assert_eq!(store.revision(), 2);

        store.clear();
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn topic_key_wins_over_payload_copies() {
        let mut store = SensorStateStore::new();
        apply(&mut store, "s2", "h", S1_TEMPERATURE);

        let key = SensorKey::new("s2", "h");
        let stored = store.get(&key).unwrap();
        assert_eq!(stored.key(), &key);
        assert_eq!(stored.payload_tag(), Some("t"));
        assert_eq!(stored.payload_instance(), Some("s1"));
        assert!(store.query(&TagFilter::single("t")).is_empty());
        assert_eq!(store.query(&TagFilter::single("h")).len(), 1);
    }
}
