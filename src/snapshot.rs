// src/snapshot.rs
//
// Periodic consistent views of the whole wall. A snapshot is assembled in
// one pass over registry state owned by a single task, so it can never mix
// two cycles of the same stream. Consumers receive it as an immutable
// Arc; sequence numbers are strictly monotonic even when nothing moved.

use crate::registry::{CrossScreenRegistry, CrossTrack, TrackObservation};
use crate::types::{BoundingBox, GlobalTrackId, ScreenId, TrackId};
use serde::Serialize;

/// One live track as it appears in a snapshot, enriched with its owning
/// cross-screen identity.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDetection {
    pub stream_id: ScreenId,
    pub track_id: TrackId,
    /// Absent only if the registry has not seen this track's spawn yet.
    pub global_id: Option<GlobalTrackId>,
    pub screens_crossed: u32,
    pub predicted_screens: Vec<ScreenId>,
    pub bbox: BoundingBox,
    pub class: String,
    pub confidence: f32,
    pub velocity: (f32, f32),
    pub age_since_update: u32,
    pub last_seen_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub generated_ms: f64,
    pub detections: Vec<SnapshotDetection>,
    pub cross_tracks: Vec<CrossTrack>,
}

impl Snapshot {
    /// Placeholder published before the first aggregation tick.
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            generated_ms: 0.0,
            detections: Vec::new(),
            cross_tracks: Vec::new(),
        }
    }
}

/// Owns the sequence counter. Lives on the registry task, next to the
/// state it reads.
pub struct SnapshotAggregator {
    sequence: u64,
}

impl SnapshotAggregator {
    pub fn new() -> Self {
        Self { sequence: 0 }
    }

    pub fn assemble(&mut self, registry: &CrossScreenRegistry, now_ms: f64) -> Snapshot {
        self.sequence += 1;

        let mut detections: Vec<SnapshotDetection> = registry
            .stream_views()
            .iter()
            .flat_map(|(&stream_id, tracks)| {
                tracks.iter().map(move |obs| (stream_id, obs))
            })
            .map(|(stream_id, obs): (ScreenId, &TrackObservation)| {
                let cross = registry.cross_track_for(stream_id, obs.track_id);
                SnapshotDetection {
                    stream_id,
                    track_id: obs.track_id,
                    global_id: cross.map(|c| c.id),
                    screens_crossed: cross.map_or(0, |c| c.screens_crossed),
                    predicted_screens: cross
                        .map_or_else(Vec::new, |c| c.predicted_screens.clone()),
                    bbox: obs.bbox,
                    class: obs.class.clone(),
                    confidence: obs.confidence,
                    velocity: obs.velocity,
                    age_since_update: obs.age_since_update,
                    last_seen_ms: obs.last_seen_ms,
                }
            })
            .collect();
        // Deterministic ordering: two snapshots of identical state serialize
        // identically.
        detections.sort_by_key(|d| (d.stream_id, d.track_id));

        let mut cross_tracks: Vec<CrossTrack> = registry.cross_tracks().cloned().collect();
        cross_tracks.sort_by_key(|c| c.id);

        Snapshot {
            sequence: self.sequence,
            generated_ms: now_ms,
            detections,
            cross_tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StreamUpdate;
    use crate::types::{BoundingBox, HandoffConfig};

    fn obs(track_id: TrackId, cx: f32) -> TrackObservation {
        TrackObservation {
            track_id,
            bbox: BoundingBox::new(cx - 0.05, 0.45, 0.1, 0.1),
            class: "drone".to_string(),
            confidence: 0.9,
            velocity: (0.0, 0.0),
            age_since_update: 0,
            last_seen_ms: 0.0,
        }
    }

    fn seeded_registry() -> CrossScreenRegistry {
        let mut reg = CrossScreenRegistry::new(&HandoffConfig::default());
        // Streams fed out of order on purpose.
        reg.apply(StreamUpdate {
            stream_id: 4,
            timestamp_ms: 10.0,
            tracks: vec![obs(2, 0.5), obs(1, 0.2)],
            spawned: vec![2, 1],
            ..StreamUpdate::default()
        });
        reg.apply(StreamUpdate {
            stream_id: 0,
            timestamp_ms: 12.0,
            tracks: vec![obs(7, 0.8)],
            spawned: vec![7],
            ..StreamUpdate::default()
        });
        reg
    }

    #[test]
    fn test_sequence_strictly_monotonic_even_when_idle() {
        let reg = CrossScreenRegistry::new(&HandoffConfig::default());
        let mut agg = SnapshotAggregator::new();
        let a = agg.assemble(&reg, 100.0);
        let b = agg.assemble(&reg, 200.0);
        let c = agg.assemble(&reg, 300.0);
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(c.sequence, 3);
        assert!(a.detections.is_empty());
    }

    #[test]
    fn test_detections_ordered_by_stream_then_track() {
        let reg = seeded_registry();
        let mut agg = SnapshotAggregator::new();
        let snapshot = agg.assemble(&reg, 50.0);
        let keys: Vec<_> = snapshot
            .detections
            .iter()
            .map(|d| (d.stream_id, d.track_id))
            .collect();
        assert_eq!(keys, vec![(0, 7), (4, 1), (4, 2)]);
    }

    #[test]
    fn test_every_detection_carries_its_global_id() {
        let reg = seeded_registry();
        let mut agg = SnapshotAggregator::new();
        let snapshot = agg.assemble(&reg, 50.0);
        assert_eq!(snapshot.cross_tracks.len(), 3);
        for detection in &snapshot.detections {
            let gid = detection.global_id.expect("registered track");
            assert!(snapshot.cross_tracks.iter().any(|c| c.id == gid));
        }
        // Cross tracks sorted by id.
        let ids: Vec<_> = snapshot.cross_tracks.iter().map(|c| c.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_identical_state_yields_identical_content() {
        let reg = seeded_registry();
        let mut agg = SnapshotAggregator::new();
        let a = agg.assemble(&reg, 50.0);
        let b = agg.assemble(&reg, 60.0);
        assert_eq!(b.sequence, a.sequence + 1);
        // Same state, same content; only sequence and timestamp differ.
        assert_eq!(
            serde_json::to_string(&a.detections).unwrap(),
            serde_json::to_string(&b.detections).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&a.cross_tracks).unwrap(),
            serde_json::to_string(&b.cross_tracks).unwrap()
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let reg = seeded_registry();
        let mut agg = SnapshotAggregator::new();
        let snapshot = agg.assemble(&reg, 50.0);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"sequence\":1"));
        assert!(json.contains("\"cross_tracks\""));
    }
}
