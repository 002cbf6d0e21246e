use std::cell::{OnceCell, Ref, RefCell};
use std::collections::BTreeSet;
use std::sync::Arc;

use fxhash::FxHashMap;

use super::backend::{Backend, Event, EventId};
use super::error::IngestError;
use super::record::{add_record, Record, Translation};

/// The interface between the analysis code and the facility backends.
///
/// Every event handed to analysis code is an EventTranslator. Lookups go to the backend
/// at most once per key; the result, including a "not found", is cached for the life of
/// the translator and the same object is returned on every later call.
///
/// The translator borrows its backend, so the stream cannot be advanced while a
/// translator is still alive.
pub struct EventTranslator<'a> {
    event: Event,
    backend: &'a dyn Backend,
    cache: RefCell<FxHashMap<String, Option<Arc<Translation>>>>,
    keys: OnceCell<BTreeSet<String>>,
    native_keys: OnceCell<BTreeSet<String>>,
    id: OnceCell<EventId>,
    analysis: RefCell<Translation>,
}

impl<'a> EventTranslator<'a> {
    pub fn new(event: Event, backend: &'a dyn Backend) -> Self {
        Self {
            event,
            backend,
            cache: RefCell::new(FxHashMap::default()),
            keys: OnceCell::new(),
            native_keys: OnceCell::new(),
            id: OnceCell::new(),
            analysis: RefCell::new(Translation::new()),
        }
    }

    /// Pull the next event from a backend and wrap it
    pub fn next_from(backend: &'a mut dyn Backend) -> Result<Self, IngestError> {
        let event = backend.next_event()?;
        Ok(Self::new(event, backend))
    }

    /// Records for a common key or a literal native field name.
    ///
    /// None means the key is unknown to both the schema and the event.
    pub fn get(&self, key: &str) -> Option<Arc<Translation>> {
        if let Some(cached) = self.cache.borrow().get(key) {
            return cached.clone();
        }
        let translated = self.backend.translate(&self.event, key).map(Arc::new);
        self.cache
            .borrow_mut()
            .entry(key.to_string())
            .or_insert(translated)
            .clone()
    }

    /// A single record under a key, e.g. `record("photonPixelDetectors", "CCD")`
    pub fn record(&self, key: &str, name: &str) -> Option<Record> {
        self.get(key)?.get(name).cloned()
    }

    /// The translated keys available
    pub fn keys(&self) -> &BTreeSet<String> {
        self.keys
            .get_or_init(|| self.backend.event_keys(&self.event))
    }

    /// The keys, with facility specific names, available
    pub fn native_keys(&self) -> &BTreeSet<String> {
        self.native_keys
            .get_or_init(|| self.backend.event_native_keys(&self.event))
    }

    /// An id which is unique for each pulse and increases monotonically
    pub fn event_id(&self) -> EventId {
        *self.id.get_or_init(|| self.backend.event_id(&self.event))
    }

    /// Attach a value computed by analysis code to this event
    pub fn add_analysis(&self, record: Record) {
        add_record(&mut self.analysis.borrow_mut(), record);
    }

    /// A value previously attached with add_analysis
    pub fn analysis(&self, name: &str) -> Option<Record> {
        self.analysis.borrow().get(name).cloned()
    }

    /// Every value attached by analysis code so far
    pub fn analysis_records(&self) -> Ref<'_, Translation> {
        self.analysis.borrow()
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

impl std::fmt::Debug for EventTranslator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTranslator")
            .field("backend", &self.backend.name())
            .field("train_id", &self.event.train().train_id)
            .field("pulse", &self.event.pulse_index())
            .finish()
    }
}
