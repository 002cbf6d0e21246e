use std::collections::VecDeque;

use super::event_translator::EventTranslator;
use super::record::{Record, Unit};

/// Rolling window of hit/miss decisions.
///
/// The window is owned by the caller and sized once; a different history length means
/// a different HitHistory.
#[derive(Debug, Clone)]
pub struct HitHistory {
    window: VecDeque<bool>,
    capacity: usize,
}

impl HitHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a decision, dropping the oldest once the window is full
    pub fn record(&mut self, hit: bool) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(hit);
    }

    pub fn hits(&self) -> usize {
        self.window.iter().filter(|hit| **hit).count()
    }

    pub fn misses(&self) -> usize {
        self.window.len() - self.hits()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hit rate over the window in percent; 0 for an empty window
    pub fn hit_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            100.0 * self.hits() as f64 / self.window.len() as f64
        }
    }
}

/// Outcome of the lit pixel hitfinder for one detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitScore {
    pub lit_pixels: usize,
    pub is_hit: bool,
}

/// A simple hitfinder that counts the pixels above `adu_threshold`.
///
/// The detector is looked up as record `name` under common key `key` (e.g.
/// `photonPixelDetectors`/`CCD`). Adds `isHit - <name>` and `hitscore - <name>` to the
/// analysis namespace of the event. Returns None if the detector is missing or is not an
/// array.
pub fn count_lit_pixels(
    evt: &EventTranslator<'_>,
    key: &str,
    name: &str,
    adu_threshold: f64,
    hitscore_threshold: usize,
) -> Option<HitScore> {
    let detector = evt.record(key, name)?;
    let frame = detector.value().as_array()?;
    let lit_pixels = frame.iter().filter(|adu| **adu > adu_threshold).count();
    let score = HitScore {
        lit_pixels,
        is_hit: lit_pixels > hitscore_threshold,
    };
    evt.add_analysis(Record::analysis(
        &format!("isHit - {name}"),
        score.is_hit,
        None,
    ));
    evt.add_analysis(Record::analysis(
        &format!("hitscore - {name}"),
        lit_pixels as i64,
        Some(Unit::Count),
    ));
    Some(score)
}

/// Add a decision to the history and attach `nrHit` and `nrMiss` to the event
pub fn count_hits(evt: &EventTranslator<'_>, history: &mut HitHistory, hit: bool) {
    history.record(hit);
    evt.add_analysis(Record::analysis("nrHit", history.hits() as i64, None));
    evt.add_analysis(Record::analysis("nrMiss", history.misses() as i64, None));
}

/// Count the hit and attach the rolling `hitrate` in percent to the event.
///
/// This is the rate seen by one stream; combining rates of several workers is up to
/// whoever runs them.
pub fn hitrate(evt: &EventTranslator<'_>, history: &mut HitHistory, hit: bool) -> f64 {
    count_hits(evt, history, hit);
    let rate = history.hit_rate();
    evt.add_analysis(Record::analysis("hitrate", rate, Some(Unit::Percent)));
    rate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::key_schema::{KeySchema, SchemaEntry};
    use crate::online::OnlineBackend;
    use crate::record::Value;
    use crate::train::{Pulse, Train};
    use crate::transport::channel_pair;
    use ndarray::Array2;

    #[test]
    fn test_history_window() {
        let mut history = HitHistory::new(3);
        for hit in [true, true, false, false] {
            history.record(hit);
        }
        // The first hit has fallen out of the window
        assert_eq!(history.len(), 3);
        assert_eq!(history.hits(), 1);
        assert_eq!(history.misses(), 2);
        assert!((history.hit_rate() - 100.0 / 3.0).abs() < 1e-12);
        assert_eq!(HitHistory::new(0).capacity(), 1);
    }

    #[test]
    fn test_lit_pixels_on_event() {
        let schema = KeySchema::from_entries([(
            "ccd",
            SchemaEntry::new("photonPixelDetectors", "CCD", Unit::Adu),
        )])
        .unwrap();
        let mut frame = Array2::<f64>::zeros((4, 4));
        frame[[0, 0]] = 5.0;
        frame[[1, 2]] = 7.0;
        frame[[3, 3]] = 0.4;
        let train = Train::new(1, 1, vec![Pulse::new().with_field("ccd", frame.into_dyn())]);

        let (transport, endpoint) = channel_pair();
        let server = std::thread::spawn(move || endpoint.serve(vec![train]));
        let mut backend = OnlineBackend::new("test", transport, schema, 0);
        let event = backend.next_event().unwrap();
        let evt = EventTranslator::new(event, &backend);

        let score = count_lit_pixels(&evt, "photonPixelDetectors", "CCD", 0.5, 1).unwrap();
        assert_eq!(score, HitScore { lit_pixels: 2, is_hit: true });
        assert_eq!(
            evt.analysis("hitscore - CCD").unwrap().value(),
            &Value::Integer(2)
        );
        assert!(count_lit_pixels(&evt, "photonPixelDetectors", "missing", 0.5, 1).is_none());

        let mut history = HitHistory::new(10);
        assert_eq!(hitrate(&evt, &mut history, score.is_hit), 100.0);
        assert_eq!(evt.analysis("nrHit").unwrap().value(), &Value::Integer(1));
        assert_eq!(
            evt.analysis("hitrate").unwrap().unit(),
            Some(&Unit::Percent)
        );

        drop(evt);
        drop(backend);
        assert_eq!(server.join().unwrap(), 1);
    }
}
