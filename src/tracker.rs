// src/tracker.rs
//
// Per-stream multi-object tracker. Converts each frame's detection list
// into a stable set of tracks for one camera stream.
//
// Design:
//   - Greedy affinity matching (overlap + class agreement) — predictable
//     per-frame cost over optimal assignment; occasional identity switches
//     on near-ties are a documented limitation, not a defect
//   - Tracks are extrapolated to the new frame time with their last known
//     velocity before scoring, so fast movers keep their identity
//   - Unmatched tracks coast on their last velocity through brief detector
//     gaps and are evicted once they outlive the memory window
//   - Track ids are monotonic and never reused for the tracker's lifetime

use crate::types::{BoundingBox, Detection, ScreenId, TrackId, TrackerConfig, VelocityConfig};
use crate::velocity::{VelocityEstimate, VelocityEstimator};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

// ============================================================================
// AFFINITY WEIGHTS
// ============================================================================

/// Weight of bounding-box overlap in the combined affinity score.
const OVERLAP_WEIGHT: f32 = 0.75;
/// Weight of class-label agreement. Class alone (no overlap) scores 0.25,
/// below the default threshold, so a match always needs some geometry.
const CLASS_AGREEMENT_WEIGHT: f32 = 0.25;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct TrackSample {
    cx: f32,
    cy: f32,
    timestamp_ms: f64,
}

/// One tracked object within a single stream. Identity is valid only inside
/// that stream; cross-screen identity lives in the registry.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub stream_id: ScreenId,
    pub bbox: BoundingBox,
    /// Majority vote over the classes seen in the sample window.
    pub class: String,
    pub confidence: f32,
    pub age_since_update: u32,
    pub last_seen_ms: f64,
    samples: VecDeque<TrackSample>,
    class_votes: VecDeque<String>,
    velocity: VelocityEstimator,
    window: usize,
}

impl Track {
    fn new(
        id: TrackId,
        stream_id: ScreenId,
        det: &Detection,
        window: usize,
        smoothing: f32,
    ) -> Self {
        let (cx, cy) = det.bbox.center();
        let mut samples = VecDeque::with_capacity(window);
        samples.push_back(TrackSample {
            cx,
            cy,
            timestamp_ms: det.timestamp_ms,
        });
        let mut class_votes = VecDeque::with_capacity(window);
        class_votes.push_back(det.class.clone());
        Self {
            id,
            stream_id,
            bbox: det.bbox,
            class: det.class.clone(),
            confidence: det.confidence,
            age_since_update: 0,
            last_seen_ms: det.timestamp_ms,
            samples,
            class_votes,
            velocity: VelocityEstimator::new(smoothing),
            window,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        self.bbox.center()
    }

    pub fn velocity(&self) -> VelocityEstimate {
        self.velocity.estimate()
    }

    /// Where this track's box would be at `timestamp_ms`, coasting on the
    /// last velocity estimate. Falls back to the last observed box when
    /// velocity is undefined.
    pub fn extrapolated_bbox(&self, timestamp_ms: f64) -> BoundingBox {
        let estimate = self.velocity.estimate();
        if !estimate.is_defined() {
            return self.bbox;
        }
        let dt_s = ((timestamp_ms - self.last_seen_ms) / 1000.0).max(0.0) as f32;
        self.bbox.extrapolated(estimate.vx, estimate.vy, dt_s)
    }

    fn update_with(&mut self, det: &Detection) {
        let (cx, cy) = det.bbox.center();
        if let Some(last) = self.samples.back() {
            let dt_s = (det.timestamp_ms - last.timestamp_ms) / 1000.0;
            self.velocity.observe(cx - last.cx, cy - last.cy, dt_s);
        }

        self.samples.push_back(TrackSample {
            cx,
            cy,
            timestamp_ms: det.timestamp_ms,
        });
        self.class_votes.push_back(det.class.clone());
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
        while self.class_votes.len() > self.window {
            self.class_votes.pop_front();
        }

        self.bbox = det.bbox;
        self.confidence = det.confidence;
        self.last_seen_ms = det.timestamp_ms;
        self.age_since_update = 0;
        self.class = self.majority_class();
    }

    fn mark_missed(&mut self) {
        self.age_since_update += 1;
    }

    fn majority_class(&self) -> String {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for class in &self.class_votes {
            *counts.entry(class.as_str()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            // Deterministic on ties: higher count wins, then lexicographic.
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(class, _)| class.to_string())
            .unwrap_or_else(|| self.class.clone())
    }
}

/// What one tracking cycle did, for the registry and the metrics.
#[derive(Debug, Default)]
pub struct FrameOutcome {
    pub spawned: Vec<TrackId>,
    pub evicted: Vec<TrackId>,
    pub dropped: usize,
}

// ============================================================================
// OVERLAP
// ============================================================================

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.w).min(b.x + b.w);
    let y2 = (a.y + a.h).min(b.y + b.h);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

// ============================================================================
// TRACKER
// ============================================================================

pub struct StreamTracker {
    stream_id: ScreenId,
    config: TrackerConfig,
    smoothing: f32,
    tracks: Vec<Track>,
    next_id: TrackId,
}

impl StreamTracker {
    pub fn new(stream_id: ScreenId, config: TrackerConfig, velocity: &VelocityConfig) -> Self {
        Self {
            stream_id,
            config,
            smoothing: velocity.smoothing,
            tracks: Vec::with_capacity(32),
            next_id: 1,
        }
    }

    pub fn stream_id(&self) -> ScreenId {
        self.stream_id
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get_track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Process one frame's detections. Malformed or foreign detections are
    /// dropped and logged, never fatal; the detector is untrusted input.
    pub fn observe(&mut self, detections: &[Detection], timestamp_ms: f64) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();

        let valid: Vec<&Detection> = detections
            .iter()
            .filter(|d| {
                if !d.is_valid() {
                    warn!(
                        stream = self.stream_id,
                        "dropping malformed detection: bbox=({:.3},{:.3},{:.3},{:.3}) conf={:.2}",
                        d.bbox.x,
                        d.bbox.y,
                        d.bbox.w,
                        d.bbox.h,
                        d.confidence
                    );
                    outcome.dropped += 1;
                    return false;
                }
                if d.stream_id != self.stream_id {
                    warn!(
                        stream = self.stream_id,
                        "dropping detection routed from stream {}", d.stream_id
                    );
                    outcome.dropped += 1;
                    return false;
                }
                if d.confidence < self.config.min_confidence {
                    outcome.dropped += 1;
                    return false;
                }
                true
            })
            .collect();

        // ── Greedy matching: extrapolated overlap + class agreement ──
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            let predicted = track.extrapolated_bbox(timestamp_ms);
            for (di, det) in valid.iter().enumerate() {
                let overlap = iou(&predicted, &det.bbox);
                let class_agrees = if track.class == det.class { 1.0 } else { 0.0 };
                let affinity = OVERLAP_WEIGHT * overlap + CLASS_AGREEMENT_WEIGHT * class_agrees;
                if affinity >= self.config.min_affinity {
                    pairs.push((ti, di, affinity));
                }
            }
        }
        // Highest affinity first; ties go to the older (lower-id) track.
        pairs.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.tracks[a.0].id.cmp(&self.tracks[b.0].id))
                .then_with(|| a.1.cmp(&b.1))
        });

        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_dets = vec![false; valid.len()];
        for (ti, di, affinity) in &pairs {
            if matched_tracks[*ti] || matched_dets[*di] {
                continue;
            }
            matched_tracks[*ti] = true;
            matched_dets[*di] = true;
            debug!(
                stream = self.stream_id,
                "track {} matched (affinity={:.2})", self.tracks[*ti].id, affinity
            );
            self.tracks[*ti].update_with(valid[*di]);
        }

        // ── Unmatched tracks coast ──
        for (ti, matched) in matched_tracks.iter().enumerate() {
            if !matched {
                self.tracks[ti].mark_missed();
            }
        }

        // ── Unmatched detections spawn new tracks ──
        for (di, matched) in matched_dets.iter().enumerate() {
            if !matched {
                let track = Track::new(
                    self.next_id,
                    self.stream_id,
                    valid[di],
                    self.config.memory_window as usize,
                    self.smoothing,
                );
                info!(
                    stream = self.stream_id,
                    "🆕 track {} spawned: class={} center=({:.2},{:.2})",
                    track.id,
                    track.class,
                    track.center().0,
                    track.center().1
                );
                outcome.spawned.push(track.id);
                self.next_id += 1;
                self.tracks.push(track);
            }
        }

        // ── Eviction: anything past the memory window goes before the
        // next snapshot ──
        let window = self.config.memory_window;
        let stream_id = self.stream_id;
        self.tracks.retain(|t| {
            if t.age_since_update > window {
                info!(
                    stream = stream_id,
                    "🗑️ track {} evicted (coasted {} frames)", t.id, t.age_since_update
                );
                outcome.evicted.push(t.id);
                return false;
            }
            true
        });

        outcome
    }
}

// ============================================================================
// TESTS
// ============================================================================
