use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use libpulsestream::backend::{Backend, EventId};
use libpulsestream::config::{BackendKind, Config};
use libpulsestream::constants::{TRAIN_FILE_EXTENSION, TRAIN_FILE_PREFIX};
use libpulsestream::error::IngestError;
use libpulsestream::event_translator::EventTranslator;
use libpulsestream::key_schema::{KeySchema, SchemaEntry};
use libpulsestream::offline::OfflineBackend;
use libpulsestream::online::{OnlineBackend, StreamState};
use libpulsestream::process::process;
use libpulsestream::record::{Unit, Value};
use libpulsestream::replay::ReplayServer;
use libpulsestream::train::{Pulse, Train};
use libpulsestream::train_file::TrainFileWriter;
use libpulsestream::train_stack::TrainStack;
use libpulsestream::transport::{channel_pair, TcpTransport};

const DETECTORS: &str = "photonPixelDetectors";

fn photon_schema() -> KeySchema {
    KeySchema::from_entries([(
        "photon_count",
        SchemaEntry::new(DETECTORS, "CCD", Unit::Count),
    )])
    .unwrap()
}

/// A train of pulses whose photon_count runs from `first` upwards
fn photon_train(train_id: u64, first: i64, n_pulses: usize) -> Train {
    let pulses = (0..n_pulses as i64)
        .map(|i| Pulse::new().with_field("photon_count", first + i))
        .collect();
    Train::new(train_id, 1_000 * train_id, pulses)
}

fn record_run(dir: &Path, files: &[Vec<Train>]) {
    for (index, trains) in files.iter().enumerate() {
        let path = dir.join(format!("{TRAIN_FILE_PREFIX}{index:04}{TRAIN_FILE_EXTENSION}"));
        let mut writer = TrainFileWriter::create(&path).unwrap();
        for train in trains {
            writer.write_train(train).unwrap();
        }
        writer.close().unwrap();
    }
}

/// Pull every photon_count and event id until the stream ends
fn drain(backend: &mut dyn Backend) -> (Vec<i64>, Vec<EventId>, IngestError) {
    let mut counts = Vec::new();
    let mut ids = Vec::new();
    loop {
        let evt = match EventTranslator::next_from(&mut *backend) {
            Ok(evt) => evt,
            Err(e) => return (counts, ids, e),
        };
        let detectors = evt.get(DETECTORS).unwrap();
        match detectors["CCD"].value() {
            Value::Integer(n) => counts.push(*n),
            other => panic!("unexpected value {other:?}"),
        }
        ids.push(evt.event_id());
    }
}

#[test]
fn six_pulses_then_exhausted() {
    let (transport, endpoint) = channel_pair();
    let server = thread::spawn(move || {
        endpoint.serve(vec![photon_train(1, 10, 3), photon_train(2, 20, 3)])
    });
    let mut backend = OnlineBackend::new("synthetic", transport, photon_schema(), 1);

    let mut seen = Vec::new();
    for _ in 0..6 {
        let evt = EventTranslator::next_from(&mut backend).unwrap();
        let record = evt.record(DETECTORS, "CCD").unwrap();
        assert_eq!(record.unit(), Some(&Unit::Count));
        seen.push(record.value().clone());
    }
    assert_eq!(
        seen,
        [10, 11, 12, 20, 21, 22].map(Value::Integer).to_vec()
    );

    let seventh = EventTranslator::next_from(&mut backend);
    assert!(matches!(seventh, Err(IngestError::StreamExhausted)));
    assert_eq!(backend.state(), StreamState::Closed);

    drop(backend);
    assert_eq!(server.join().unwrap(), 2);
}

#[test]
fn offline_event_ids_increase() {
    let dir = tempfile::tempdir().unwrap();
    record_run(
        dir.path(),
        &[
            vec![photon_train(1, 0, 4), photon_train(2, 4, 0)],
            vec![photon_train(3, 4, 2)],
        ],
    );

    let stack = TrainStack::new(dir.path()).unwrap();
    let mut backend = OfflineBackend::new("offline", stack, photon_schema());
    let (counts, ids, end) = drain(&mut backend);

    assert!(end.is_exhausted());
    assert_eq!(counts, (0..6).collect::<Vec<i64>>());
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(backend.units_received(), 3);
}

#[test]
fn blocks_at_boundary_until_prefetch_arrives() {
    let (transport, endpoint) = channel_pair();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let server = thread::spawn(move || {
        assert!(endpoint.wait_for_request());
        endpoint.reply(Some(photon_train(1, 0, 3)));
        // The prefetch for the second train is held back until released
        assert!(endpoint.wait_for_request());
        release_rx.recv().unwrap();
        assert_eq!(endpoint.drain_requests(), 0);
        endpoint.reply(Some(photon_train(2, 3, 3)));
        endpoint.serve(Vec::new())
    });
    let mut backend = OnlineBackend::new("delayed", transport, photon_schema(), 2);

    backend.next_event().unwrap();
    assert_eq!(backend.requests_issued(), 1);
    backend.next_event().unwrap();
    assert_eq!(backend.requests_issued(), 2);
    backend.next_event().unwrap();
    assert_eq!(backend.requests_issued(), 2);
    assert_eq!(backend.state(), StreamState::RequestPending);

    let delay = Duration::from_millis(200);
    let releaser = thread::spawn(move || {
        thread::sleep(delay);
        release_tx.send(()).unwrap();
    });
    let start = Instant::now();
    let evt = EventTranslator::next_from(&mut backend).unwrap();
    assert!(start.elapsed() >= delay / 2);
    assert_eq!(evt.event_id(), EventId { timestamp: 2_000, pulse: 0 });
    assert_eq!(evt.record(DETECTORS, "CCD").unwrap().value(), &Value::Integer(3));
    drop(evt);
    releaser.join().unwrap();

    // One request per train boundary, the rest of the stream is unaffected
    let (counts, _, end) = drain(&mut backend);
    assert_eq!(counts, vec![4, 5]);
    assert!(end.is_exhausted());
    assert_eq!(backend.requests_issued(), 3);

    drop(backend);
    assert_eq!(server.join().unwrap(), 0);
}

#[test]
fn tcp_replay_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    record_run(
        dir.path(),
        &[vec![photon_train(1, 0, 2)], vec![photon_train(2, 2, 3)]],
    );

    let server =
        ReplayServer::bind("127.0.0.1:0", TrainStack::new(dir.path()).unwrap()).unwrap();
    let address = server.local_addr().unwrap();
    let handle = thread::spawn(move || server.serve());

    let transport = TcpTransport::connect(address).unwrap();
    let mut backend = OnlineBackend::new("replay", transport, photon_schema(), 1);
    let (counts, ids, end) = drain(&mut backend);
    drop(backend);

    assert!(end.is_exhausted());
    assert_eq!(counts, vec![0, 1, 2, 3, 4]);
    assert_eq!(ids.last(), Some(&EventId { timestamp: 2_000, pulse: 2 }));
    assert_eq!(handle.join().unwrap().unwrap(), 2);
}

#[test]
fn process_offline_run() {
    let dir = tempfile::tempdir().unwrap();
    record_run(dir.path(), &[vec![photon_train(1, 0, 3), photon_train(2, 3, 3)]]);

    let config = Config {
        backend: BackendKind::Offline,
        data_path: Some(dir.path().to_path_buf()),
        status_interval: 4,
        ..Default::default()
    };
    let (tx, rx) = mpsc::channel();
    let summary = process(config, tx).unwrap();

    assert_eq!(summary.events_processed, 6);
    assert_eq!(summary.units_received, 2);
    assert!(summary.hit_rate.is_none());
    // connecting, one progress report, finished
    assert_eq!(rx.try_iter().count(), 3);
}
