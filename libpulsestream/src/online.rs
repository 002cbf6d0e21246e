use std::collections::BTreeSet;
use std::sync::Arc;

use super::backend::{
    train_event_id, train_event_keys, train_native_keys, translate_train, Backend, Event, EventId,
};
use super::error::{IngestError, StreamFault};
use super::key_schema::KeySchema;
use super::record::Translation;
use super::train::Train;
use super::transport::Transport;

/// Observable state of the ingestion state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing buffered, nothing asked for
    Idle,
    /// A request is outstanding and nothing is buffered
    RequestPending,
    /// A train is buffered and has unconsumed pulses
    UnitBuffered,
    /// A train is buffered, has unconsumed pulses, and the next one was already requested
    UnitBufferedRequestPending,
    /// Every pulse of the buffered train has been handed out
    UnitExhausted,
    /// The stream ended, cleanly or not, and the transport has been released
    Closed,
}

/// Backend for live facilities which deliver full trains over a pull-based transport.
///
/// The facility hands out whole trains; pulses are cut from them one at a time. To hide
/// the round-trip latency the next train is requested once fewer than `read_ahead`
/// pulses remain in the buffered one, so that by the time the consumer reaches the end
/// of the train the response is usually already waiting. There is never more than one
/// outstanding request.
#[derive(Debug)]
pub struct OnlineBackend<T: Transport> {
    name: String,
    schema: KeySchema,
    transport: Option<T>,
    read_ahead: usize,
    unit: Option<Arc<Train>>,
    cursor: usize,
    request_pending: bool,
    pending_fault: Option<StreamFault>,
    requests_issued: u64,
    units_received: u64,
}

impl<T: Transport> OnlineBackend<T> {
    /// Create a new OnlineBackend.
    ///
    /// No request is issued until the first call to next_event
    pub fn new(name: &str, transport: T, schema: KeySchema, read_ahead: usize) -> Self {
        Self {
            name: name.to_string(),
            schema,
            transport: Some(transport),
            read_ahead,
            unit: None,
            cursor: 0,
            request_pending: false,
            pending_fault: None,
            requests_issued: 0,
            units_received: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        if self.transport.is_none() {
            return StreamState::Closed;
        }
        match (&self.unit, self.request_pending) {
            (None, false) => StreamState::Idle,
            (None, true) => StreamState::RequestPending,
            (Some(unit), pending) if self.cursor < unit.pulse_count() => {
                if pending {
                    StreamState::UnitBufferedRequestPending
                } else {
                    StreamState::UnitBuffered
                }
            }
            (Some(_), true) => StreamState::RequestPending,
            (Some(_), false) => StreamState::UnitExhausted,
        }
    }

    /// Total number of requests sent to the transport
    pub fn requests_issued(&self) -> u64 {
        self.requests_issued
    }

    /// Pulses of the buffered train not yet handed out
    fn remaining_pulses(&self) -> usize {
        self.unit
            .as_ref()
            .map(|unit| unit.pulse_count().saturating_sub(self.cursor))
            .unwrap_or(0)
    }

    /// Send a request and mark it outstanding
    fn send_request(&mut self) -> Result<(), StreamFault> {
        let transport = self.transport.as_mut().ok_or(StreamFault::Closed)?;
        transport.send_request()?;
        self.request_pending = true;
        self.requests_issued += 1;
        Ok(())
    }

    /// Issue a request for the next train. Does nothing if one is already outstanding.
    ///
    /// A prefetch which failed earlier surfaces here, once the buffered train is used up.
    fn request_next_unit(&mut self) -> Result<(), IngestError> {
        if let Some(fault) = self.pending_fault.take() {
            return Err(self.terminate(fault.into()));
        }
        if self.request_pending {
            return Ok(());
        }
        match self.send_request() {
            Ok(()) => Ok(()),
            Err(fault) => Err(self.terminate(fault.into())),
        }
    }

    /// Prefetch the next train if the buffered one is running low.
    ///
    /// A failed prefetch is held back so the pulses still buffered are handed out first.
    fn check_read_ahead(&mut self) {
        if self.unit.is_some()
            && !self.request_pending
            && self.pending_fault.is_none()
            && self.remaining_pulses() < self.read_ahead
        {
            spdlog::debug!(
                "{}: {} pulses left, requesting next train",
                self.name,
                self.remaining_pulses()
            );
            if let Err(fault) = self.send_request() {
                spdlog::warn!(
                    "{}: prefetch failed with {} pulses still buffered: {fault}",
                    self.name,
                    self.remaining_pulses()
                );
                self.pending_fault = Some(fault);
            }
        }
    }

    /// Block on the outstanding request and buffer the train it delivers
    fn receive_next_unit(&mut self) -> Result<(), IngestError> {
        self.request_next_unit()?;
        let transport = self.transport.as_mut().ok_or(StreamFault::Closed)?;
        let response = transport.receive_unit();
        self.request_pending = false;
        match response {
            Ok(Some(train)) => {
                spdlog::debug!(
                    "{}: received train {} with {} pulses",
                    self.name,
                    train.train_id,
                    train.pulse_count()
                );
                self.units_received += 1;
                self.unit = Some(Arc::new(train));
                self.cursor = 0;
                Ok(())
            }
            Ok(None) => {
                spdlog::info!(
                    "{}: source reported end of data after {} trains",
                    self.name,
                    self.units_received
                );
                Err(self.terminate(IngestError::StreamExhausted))
            }
            Err(e) => Err(self.terminate(e.into())),
        }
    }

    /// Release the transport and the buffer. Every later call reports a closed stream.
    fn terminate(&mut self, reason: IngestError) -> IngestError {
        if let IngestError::StreamTerminated(fault) = &reason {
            spdlog::error!("{}: stream terminated: {fault}", self.name);
        }
        self.transport = None;
        self.unit = None;
        self.cursor = 0;
        self.request_pending = false;
        self.pending_fault = None;
        reason
    }
}

impl<T: Transport> Backend for OnlineBackend<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_event(&mut self) -> Result<Event, IngestError> {
        if self.transport.is_none() {
            return Err(StreamFault::Closed.into());
        }
        // Empty trains are legal; skip straight past them
        while self.remaining_pulses() == 0 {
            self.receive_next_unit()?;
        }

        let unit = match &self.unit {
            Some(unit) => unit.clone(),
            None => return Err(StreamFault::Closed.into()),
        };
        let event = Event::new(unit, self.cursor);
        self.cursor += 1;
        self.check_read_ahead();
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
