use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;

use super::constants::*;
use super::error::IngestError;
use super::key_schema::KeySchema;
use super::record::{add_record, Record, RecordSource, Translation, Unit, Value};
use super::train::{Pulse, Train};

/// One pulse of one train.
///
/// An Event shares ownership of its train, so the pulse it points at stays readable even
/// after the backend has moved on to the next delivery unit. It is never handed out twice.
#[derive(Debug, Clone)]
pub struct Event {
    unit: Arc<Train>,
    pulse: usize,
}

impl Event {
    /// Create an event for a pulse of a train. The pulse index must be inside the train.
    pub(crate) fn new(unit: Arc<Train>, pulse: usize) -> Self {
        debug_assert!(pulse < unit.pulse_count());
        Self { unit, pulse }
    }

    pub fn train(&self) -> &Train {
        &self.unit
    }

    pub fn pulse_index(&self) -> usize {
        self.pulse
    }

    pub fn pulse(&self) -> &Pulse {
        // Event::new only accepts in-range indices
        &self.unit.pulses[self.pulse]
    }
}

/// Identifier of one event: train timestamp first, pulse offset second.
///
/// Ordering is lexicographic, so pulses of a later train always sort after every pulse
/// of an earlier one regardless of how many pulses trains carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId {
    pub timestamp: u64,
    pub pulse: u32,
}

impl EventId {
    /// The train time as a UTC date-time, if the timestamp is representable
    pub fn datetime(&self) -> Option<time::OffsetDateTime> {
        time::OffsetDateTime::from_unix_timestamp_nanos(self.timestamp as i128).ok()
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:04}", self.timestamp, self.pulse)
    }
}

/// The contract every facility driver satisfies.
///
/// The analysis code never talks to a Backend directly; it receives an
/// [`EventTranslator`](crate::event_translator::EventTranslator) which delegates here.
pub trait Backend {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Advance the stream by exactly one pulse.
    ///
    /// Returns [`IngestError::StreamExhausted`] once the source has cleanly run out of data
    /// and [`IngestError::StreamTerminated`] if the source broke.
    fn next_event(&mut self) -> Result<Event, IngestError>;

    /// Common keys derivable from this event, always including `parameters` and `analysis`
    fn event_keys(&self, event: &Event) -> BTreeSet<String>;

    /// Native field identifiers present in this event
    fn event_native_keys(&self, event: &Event) -> BTreeSet<String>;

    /// Translate a common key, or a literal native field name, into records.
    ///
    /// Returns None if the key matches neither.
    fn translate(&self, event: &Event, key: &str) -> Option<Translation>;

    /// Identifier unique per pulse which increases monotonically along the stream
    fn event_id(&self, event: &Event) -> EventId;

    /// Number of delivery units received so far
    fn units_received(&self) -> u64;
}

// The helpers below implement the translation rules for facilities delivering the
// train/pulse layout. A facility with a different layout provides its own.

pub(crate) fn train_event_keys(schema: &KeySchema, event: &Event) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = event
        .pulse()
        .keys()
        .filter_map(|native| schema.common_key(native))
        .map(String::from)
        .collect();
    keys.insert(EVENT_ID_KEY.to_string());
    // parameters is for slow values attached to the run, analysis is for values added later on
    keys.insert(PARAMETERS_KEY.to_string());
    keys.insert(ANALYSIS_KEY.to_string());
    keys
}

pub(crate) fn train_native_keys(event: &Event) -> BTreeSet<String> {
    event.pulse().keys().map(String::from).collect()
}

pub(crate) fn train_event_id(event: &Event) -> EventId {
    EventId {
        timestamp: event.train().timestamp,
        pulse: event.pulse_index() as u32,
    }
}

pub(crate) fn translate_train(
    backend_name: &str,
    schema: &KeySchema,
    event: &Event,
    key: &str,
) -> Option<Translation> {
    if key == ANALYSIS_KEY {
        return Some(Translation::new());
    }
    if key == EVENT_ID_KEY {
        return Some(translate_event_id(event));
    }
    if key == PARAMETERS_KEY || schema.is_common_key(key) {
        return Some(translate_common(schema, event, key));
    }

    // Not a common key, check if the key matches any of the native fields in the event
    if let Some(raw) = event.pulse().get(key) {
        spdlog::debug!(
            "{backend_name}: key {key} resolved to the native field itself ({})",
            raw.describe()
        );
        let mut values = Translation::new();
        add_record(
            &mut values,
            Record::new(
                key,
                raw.clone(),
                Some(Unit::Adu),
                RecordSource::Native(key.to_string()),
            ),
        );
        return Some(values);
    }

    spdlog::warn!(
        "{backend_name}: key {key} not found in event {}",
        train_event_id(event)
    );
    None
}

fn translate_common(schema: &KeySchema, event: &Event, common_key: &str) -> Translation {
    let pulse = event.pulse();
    let mut values = Translation::new();
    for native_type in schema.native_types(common_key) {
        if let Some(raw) = pulse.get(native_type) {
            if let Some(record) = schema.build(common_key, native_type, raw) {
                add_record(&mut values, record);
            }
        }
    }
    values
}

fn translate_event_id(event: &Event) -> Translation {
    let id = train_event_id(event);
    let mut values = Translation::new();
    add_record(
        &mut values,
        Record::new(
            TIMESTAMP_RECORD,
            Value::Integer(id.timestamp as i64),
            Some(Unit::Nanosecond),
            RecordSource::Schema(String::from("train.timestamp")),
        ),
    );
    add_record(
        &mut values,
        Record::new(
            PULSE_RECORD,
            Value::Integer(id.pulse as i64),
            None,
            RecordSource::Schema(String::from("train.pulse")),
        ),
    );
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_schema::SchemaEntry;

    fn schema() -> KeySchema {
        KeySchema::from_entries([
            (
                "agipd0",
                SchemaEntry::new("photonPixelDetectors", "AGIPD00", Unit::Adu),
            ),
            (
                "agipd1",
                SchemaEntry::new("photonPixelDetectors", "AGIPD01", Unit::Adu),
            ),
            ("xgm", SchemaEntry::new("pulseEnergies", "XGM", Unit::Microjoule)),
            (
                "pressure",
                SchemaEntry::new("parameters", "pressure", Unit::Other("mbar".into())),
            ),
        ])
        .unwrap()
    }

    fn event() -> Event {
        let pulse = Pulse::new()
            .with_field("agipd0", 1.0)
            .with_field("agipd1", 2.0)
            .with_field("xgm", 3.5)
            .with_field("cellId", 7_i64);
        Event::new(Arc::new(Train::new(5, 1_000, vec![Pulse::new(), pulse])), 1)
    }

    #[test]
    fn test_event_keys_have_reserved_namespaces() {
        let keys = train_event_keys(&schema(), &event());
        for key in [
            "photonPixelDetectors",
            "pulseEnergies",
            PARAMETERS_KEY,
            ANALYSIS_KEY,
            EVENT_ID_KEY,
        ] {
            assert!(keys.contains(key), "missing {key}");
        }
        // cellId is not in the schema
        assert_eq!(keys.len(), 5);
        assert!(train_native_keys(&event()).contains("cellId"));
    }

    #[test]
    fn test_common_key_aggregates_panels() {
        let values = translate_train("test", &schema(), &event(), "photonPixelDetectors").unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["AGIPD01"].value(), &Value::Scalar(2.0));
    }

    #[test]
    fn test_single_field_keeps_schema_unit() {
        let values = translate_train("test", &schema(), &event(), "pulseEnergies").unwrap();
        assert_eq!(values.len(), 1);
        let record = &values["XGM"];
        assert_eq!(record.value(), &Value::Scalar(3.5));
        assert_eq!(record.unit(), Some(&Unit::Microjoule));
    }

    #[test]
    fn test_reserved_and_native_keys() {
        let schema = schema();
        let event = event();
        assert!(translate_train("test", &schema, &event, ANALYSIS_KEY)
            .unwrap()
            .is_empty());
        // parameters has a schema entry but the pulse has no pressure field
        assert!(translate_train("test", &schema, &event, PARAMETERS_KEY)
            .unwrap()
            .is_empty());

        let native = translate_train("test", &schema, &event, "cellId").unwrap();
        assert_eq!(native["cellId"].source().tag(), "native");
        assert_eq!(native["cellId"].value(), &Value::Integer(7));

        assert!(translate_train("test", &schema, &event, "nonsense").is_none());
    }

    #[test]
    fn test_event_id_orders_across_trains() {
        let first = Arc::new(Train::new(1, 100, vec![Pulse::new(); 64]));
        let second = Arc::new(Train::new(2, 200, vec![Pulse::new(); 2]));
        let late_pulse = train_event_id(&Event::new(first, 63));
        let early_pulse = train_event_id(&Event::new(second, 0));
        assert!(late_pulse < early_pulse);

        let when = late_pulse.datetime().unwrap();
        assert_eq!(when.unix_timestamp_nanos(), 100);
        assert_eq!(when.year(), 1970);

        let values = translate_train("test", &schema(), &event(), EVENT_ID_KEY).unwrap();
        assert_eq!(values[TIMESTAMP_RECORD].value(), &Value::Integer(1_000));
        assert_eq!(values[PULSE_RECORD].value(), &Value::Integer(1));
    }
}
