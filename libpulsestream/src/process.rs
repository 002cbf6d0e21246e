use std::sync::mpsc::Sender;

use super::backend::{Backend, EventId};
use super::config::{BackendKind, Config};
use super::error::{IngestError, ProcessorError};
use super::event_translator::EventTranslator;
use super::hitfinding::{count_lit_pixels, hitrate, HitHistory};
use super::key_schema::KeySchema;
use super::offline::OfflineBackend;
use super::online::OnlineBackend;
use super::stream_status::{StreamPhase, StreamStatus};
use super::train_stack::TrainStack;
use super::transport::TcpTransport;

/// What a finished stream looked like
#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub events_processed: u64,
    pub units_received: u64,
    pub hits: Option<usize>,
    pub hit_rate: Option<f64>,
    pub last_event_id: Option<EventId>,
}

/// Open the backend selected by the config
pub fn create_backend(config: &Config) -> Result<Box<dyn Backend>, ProcessorError> {
    let schema = KeySchema::new(config.key_schema_path.as_deref())?;
    match config.backend {
        BackendKind::Online => {
            let transport = TcpTransport::connect(config.socket.as_str())?;
            Ok(Box::new(OnlineBackend::new(
                "online",
                transport,
                schema,
                config.read_ahead,
            )))
        }
        BackendKind::Offline => {
            let stack = TrainStack::new(config.get_data_directory()?)?;
            Ok(Box::new(OfflineBackend::new("offline", stack, schema)))
        }
    }
}

/// Drive a stream to its end (or to the configured event limit).
///
/// Runs the hitfinder on each event if enabled and reports progress every
/// `status_interval` events. A clean end of the stream is not an error.
pub fn run_stream(
    backend: &mut dyn Backend,
    config: &Config,
    tx: &Sender<StreamStatus>,
) -> Result<StreamSummary, ProcessorError> {
    let finder = &config.hitfinding;
    let mut history = finder.enabled.then(|| HitHistory::new(finder.history));
    let mut summary = StreamSummary::default();
    let mut warned_missing_detector = false;

    spdlog::info!("Streaming events from backend {}...", backend.name());
    loop {
        if config.is_event_limit_reached(summary.events_processed) {
            spdlog::info!("Reached the event limit of {}", summary.events_processed);
            break;
        }

        {
            let evt = match EventTranslator::next_from(&mut *backend) {
                Ok(evt) => evt,
                Err(IngestError::StreamExhausted) => break,
                Err(e) => return Err(e.into()),
            };
            summary.last_event_id = Some(evt.event_id());

            if let Some(history) = history.as_mut() {
                match count_lit_pixels(
                    &evt,
                    &finder.detector_key,
                    &finder.detector_name,
                    finder.adu_threshold,
                    finder.hitscore_threshold,
                ) {
                    Some(score) => {
                        summary.hit_rate = Some(hitrate(&evt, history, score.is_hit));
                        summary.hits = Some(history.hits());
                    }
                    None if !warned_missing_detector => {
                        spdlog::warn!(
                            "Detector {}/{} not found in event {} from {}; skipping hitfinding",
                            finder.detector_key,
                            finder.detector_name,
                            evt.event_id(),
                            evt.backend_name()
                        );
                        warned_missing_detector = true;
                    }
                    None => (),
                }
            }
        }

        summary.events_processed += 1;
        if summary.events_processed % config.status_interval == 0 {
            tx.send(status(StreamPhase::Streaming, &summary, backend))?;
        }
    }

    summary.units_received = backend.units_received();
    tx.send(status(StreamPhase::Finished, &summary, backend))?;
    spdlog::info!(
        "Stream finished: {} events from {} trains",
        summary.events_processed,
        summary.units_received
    );
    if let Some(rate) = summary.hit_rate {
        spdlog::info!("Final hit rate: {rate:.2}%");
    }
    Ok(summary)
}

fn status(phase: StreamPhase, summary: &StreamSummary, backend: &dyn Backend) -> StreamStatus {
    StreamStatus::new(
        phase,
        summary.events_processed,
        backend.units_received(),
        summary.hit_rate,
        summary.last_event_id,
    )
}

/// The function to be called by a separate thread (typically the CLI).
///
/// Opens the configured backend and processes the whole stream.
pub fn process(config: Config, tx: Sender<StreamStatus>) -> Result<StreamSummary, ProcessorError> {
    config.validate()?;
    tx.send(StreamStatus::default())?;
    let mut backend = create_backend(&config)?;
    run_stream(backend.as_mut(), &config, &tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HitfindingConfig;
    use crate::key_schema::SchemaEntry;
    use crate::record::Unit;
    use crate::train::{Pulse, Train};
    use crate::transport::channel_pair;
    use ndarray::Array1;
    use std::sync::mpsc::channel;

    fn detector_train(train_id: u64, lit: &[usize]) -> Train {
        let pulses = lit
            .iter()
            .map(|n| {
                let frame = Array1::from_shape_fn(8, |i| if i < *n { 10.0 } else { 0.0 });
                Pulse::new().with_field("ccd", frame.into_dyn())
            })
            .collect();
        Train::new(train_id, train_id * 100, pulses)
    }

    fn config(n_events: Option<u64>) -> Config {
        Config {
            n_events,
            status_interval: 2,
            hitfinding: HitfindingConfig {
                enabled: true,
                detector_key: String::from("photonPixelDetectors"),
                detector_name: String::from("CCD"),
                adu_threshold: 1.0,
                hitscore_threshold: 3,
                history: 10,
            },
            ..Default::default()
        }
    }

    fn backend_over(trains: Vec<Train>) -> OnlineBackend<crate::transport::ChannelTransport> {
        let schema = KeySchema::from_entries([(
            "ccd",
            SchemaEntry::new("photonPixelDetectors", "CCD", Unit::Adu),
        )])
        .unwrap();
        let (transport, endpoint) = channel_pair();
        std::thread::spawn(move || endpoint.serve(trains));
        OnlineBackend::new("test", transport, schema, 1)
    }

    #[test]
    fn test_run_to_exhaustion() {
        let mut backend = backend_over(vec![detector_train(1, &[5, 0]), detector_train(2, &[8, 1])]);
        let (tx, rx) = channel();
        let summary = run_stream(&mut backend, &config(None), &tx).unwrap();

        assert_eq!(summary.events_processed, 4);
        assert_eq!(summary.units_received, 2);
        assert_eq!(summary.hits, Some(2));
        assert_eq!(summary.hit_rate, Some(50.0));
        assert_eq!(summary.last_event_id, Some(EventId { timestamp: 200, pulse: 1 }));

        let statuses: Vec<StreamStatus> = rx.try_iter().collect();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0].events_processed, 2);
        assert_eq!(statuses[2].phase, StreamPhase::Finished);
    }

    #[test]
    fn test_event_limit() {
        let mut backend = backend_over(vec![detector_train(1, &[5, 5, 5])]);
        let (tx, _rx) = channel();
        let summary = run_stream(&mut backend, &config(Some(2)), &tx).unwrap();
        assert_eq!(summary.events_processed, 2);
        assert_eq!(summary.hits, Some(2));
    }
}
