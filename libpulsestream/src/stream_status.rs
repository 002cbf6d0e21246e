use super::backend::EventId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamPhase {
    #[default]
    Connecting,
    Streaming,
    Finished,
}

/// Progress report sent from the processing loop to whoever is watching it
#[derive(Debug, Clone, Default)]
pub struct StreamStatus {
    pub phase: StreamPhase,
    pub events_processed: u64,
    pub units_received: u64,
    pub hit_rate: Option<f64>,
    pub last_event_id: Option<EventId>,
}

impl StreamStatus {
    pub fn new(
        phase: StreamPhase,
        events_processed: u64,
        units_received: u64,
        hit_rate: Option<f64>,
        last_event_id: Option<EventId>,
    ) -> Self {
        Self {
            phase,
            events_processed,
            units_received,
            hit_rate,
            last_event_id,
        }
    }
}
