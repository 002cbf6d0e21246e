use std::collections::BTreeSet;
use std::sync::Arc;

use super::backend::{
    train_event_id, train_event_keys, train_native_keys, translate_train, Backend, Event, EventId,
};
use super::error::{IngestError, StreamFault};
use super::key_schema::KeySchema;
use super::record::Translation;
use super::train::Train;
use super::train_stack::TrainStack;

/// Backend which replays trains recorded to disk.
///
/// Satisfies the same contract as the online backend; the consumer cannot tell the two
/// apart. Reading from disk is fast enough that no read-ahead is done.
#[derive(Debug)]
pub struct OfflineBackend {
    name: String,
    schema: KeySchema,
    stack: Option<TrainStack>,
    unit: Option<Arc<Train>>,
    cursor: usize,
    units_received: u64,
}

impl OfflineBackend {
    pub fn new(name: &str, stack: TrainStack, schema: KeySchema) -> Self {
        Self {
            name: name.to_string(),
            schema,
            stack: Some(stack),
            unit: None,
            cursor: 0,
            units_received: 0,
        }
    }

    fn remaining_pulses(&self) -> usize {
        self.unit
            .as_ref()
            .map(|unit| unit.pulse_count().saturating_sub(self.cursor))
            .unwrap_or(0)
    }

    fn load_next_unit(&mut self) -> Result<(), IngestError> {
        let stack = self.stack.as_mut().ok_or(StreamFault::Closed)?;
        match stack.get_next_train() {
            Ok(Some(train)) => {
                self.units_received += 1;
                self.unit = Some(Arc::new(train));
                self.cursor = 0;
                Ok(())
            }
            Ok(None) => {
                spdlog::info!(
                    "{}: reached end of recorded data after {} trains",
                    self.name,
                    self.units_received
                );
                self.close();
                Err(IngestError::StreamExhausted)
            }
            Err(e) => {
                spdlog::error!("{}: recorded data is unreadable: {e}", self.name);
                self.close();
                Err(e.into())
            }
        }
    }

    fn close(&mut self) {
        self.stack = None;
        self.unit = None;
        self.cursor = 0;
    }
}

impl Backend for OfflineBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_event(&mut self) -> Result<Event, IngestError> {
        if self.stack.is_none() {
            return Err(StreamFault::Closed.into());
        }
        while self.remaining_pulses() == 0 {
            self.load_next_unit()?;
        }
        let unit = match &self.unit {
            Some(unit) => unit.clone(),
            None => return Err(StreamFault::Closed.into()),
        };
        let event = Event::new(unit, self.cursor);
        self.cursor += 1;
        Ok(event)
    }

    fn event_keys(&self, event: &Event) -> BTreeSet<String> {
        train_event_keys(&self.schema, event)
    }

    fn event_native_keys(&self, event: &Event) -> BTreeSet<String> {
        train_native_keys(event)
    }

    fn translate(&self, event: &Event, key: &str) -> Option<Translation> {
        translate_train(&self.name, &self.schema, event, key)
    }

    fn event_id(&self, event: &Event) -> EventId {
        train_event_id(event)
    }

    fn units_received(&self) -> u64 {
        self.units_received
    }
}
