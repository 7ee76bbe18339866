// src/registry.rs
//
// Cross-screen identity. The registry owns every CrossTrack — the one
// identity that survives an object moving between camera streams — and is
// the single place where stream-local track ids are joined into a global
// one. It is driven by per-cycle StreamUpdate values and is deliberately
// synchronous: the engine runs it on one owning task, so every state
// transition is atomic with respect to snapshot reads.
//
// CrossTrack lifecycle:
//
//   Active ──prediction──▶ PendingHandoff ──confirmed──▶ Active (new screen,
//     ▲                        │                          screens_crossed+1)
//     └──────window expired────┘
//
//   Terminated when the last underlying track is evicted and no prediction
//   is still pending.

use crate::predictor::HandoffPrediction;
use crate::types::{BoundingBox, GlobalTrackId, HandoffConfig, ScreenId, TrackId};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrossTrackState {
    Active,
    PendingHandoff,
    Terminated,
}

/// Global identity spanning one object's appearances across streams.
/// Links to per-stream tracks are lookup-only (stream id + local track id);
/// the stream tracker stays the sole owner of track lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct CrossTrack {
    pub id: GlobalTrackId,
    pub state: CrossTrackState,
    pub class: String,
    pub current_screen: ScreenId,
    pub predicted_screens: Vec<ScreenId>,
    pub screens_crossed: u32,
    pub velocity: (f32, f32),
    pub last_seen_ms: f64,
    /// Usually one entry; briefly two while the departing and arriving
    /// tracks coexist during a handoff window.
    pub members: Vec<(ScreenId, TrackId)>,
}

/// Read-only view of one live track, as reported by its stream worker.
#[derive(Debug, Clone, Serialize)]
pub struct TrackObservation {
    pub track_id: TrackId,
    pub bbox: BoundingBox,
    pub class: String,
    pub confidence: f32,
    pub velocity: (f32, f32),
    pub age_since_update: u32,
    pub last_seen_ms: f64,
}

/// Everything one tracking cycle on one stream tells the registry.
#[derive(Debug, Clone, Default)]
pub struct StreamUpdate {
    pub stream_id: ScreenId,
    pub timestamp_ms: f64,
    /// All live tracks after the cycle (evicted ones excluded).
    pub tracks: Vec<TrackObservation>,
    pub spawned: Vec<TrackId>,
    pub evicted: Vec<TrackId>,
    /// Current predictions; each supersedes any earlier one for its track.
    pub predictions: Vec<HandoffPrediction>,
    /// Tracks that had a prediction last cycle but produced none this cycle.
    pub cleared_predictions: Vec<TrackId>,
}

#[derive(Debug)]
struct PendingPrediction {
    prediction: HandoffPrediction,
    global_id: GlobalTrackId,
    /// Tracking cycles seen on the source stream since emission.
    source_cycles: u32,
}

pub struct CrossScreenRegistry {
    prediction_enabled: bool,
    entry_tolerance: f32,
    max_wait_frames: u32,
    next_global_id: GlobalTrackId,
    cross_tracks: HashMap<GlobalTrackId, CrossTrack>,
    members: HashMap<(ScreenId, TrackId), GlobalTrackId>,
    pending: Vec<PendingPrediction>,
    /// Latest per-stream track views, for snapshot assembly.
    streams: HashMap<ScreenId, Vec<TrackObservation>>,
    confirmed_total: u64,
    expired_total: u64,
}

impl CrossScreenRegistry {
    pub fn new(config: &HandoffConfig) -> Self {
        Self {
            prediction_enabled: config.enabled,
            entry_tolerance: config.entry_tolerance,
            max_wait_frames: config.max_wait_frames,
            next_global_id: 1,
            cross_tracks: HashMap::new(),
            members: HashMap::new(),
            pending: Vec::new(),
            streams: HashMap::new(),
            confirmed_total: 0,
            expired_total: 0,
        }
    }

    pub fn cross_tracks(&self) -> impl Iterator<Item = &CrossTrack> {
        self.cross_tracks.values()
    }

    pub fn stream_views(&self) -> &HashMap<ScreenId, Vec<TrackObservation>> {
        &self.streams
    }

    pub fn cross_track_for(&self, stream: ScreenId, track: TrackId) -> Option<&CrossTrack> {
        let gid = self.members.get(&(stream, track))?;
        self.cross_tracks.get(gid)
    }

    pub fn confirmed_total(&self) -> u64 {
        self.confirmed_total
    }

    pub fn expired_total(&self) -> u64 {
        self.expired_total
    }

    /// Process one stream's tracking cycle. Transition order matters:
    /// stale predictions expire first so a late arrival can never confirm
    /// against a window that has already lapsed.
    pub fn apply(&mut self, update: StreamUpdate) {
        self.expire_due(update.stream_id, update.timestamp_ms);

        for &track_id in &update.spawned {
            let Some(obs) = update.tracks.iter().find(|o| o.track_id == track_id) else {
                error!(
                    stream = update.stream_id,
                    "spawned track {track_id} missing from its own update; skipping"
                );
                continue;
            };
            self.admit_new_track(update.stream_id, obs, update.timestamp_ms);
        }

        for obs in &update.tracks {
            self.refresh_member(update.stream_id, obs);
        }

        for &track_id in &update.evicted {
            self.release_member(update.stream_id, track_id);
        }

        if self.prediction_enabled {
            for prediction in update.predictions {
                self.register_prediction(prediction);
            }
            for &track_id in &update.cleared_predictions {
                self.clear_prediction(update.stream_id, track_id);
            }
        }

        self.streams.insert(update.stream_id, update.tracks);
    }

    // ── prediction expiry ───────────────────────────────────────────────

    fn expire_due(&mut self, stream: ScreenId, now_ms: f64) {
        let max_wait = self.max_wait_frames;
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            let entry = &mut self.pending[i];
            if entry.prediction.source_screen == stream {
                entry.source_cycles += 1;
            }
            let window_lapsed =
                entry.prediction.target_screen == stream && now_ms > entry.prediction.window_end_ms;
            let waited_out = entry.source_cycles > max_wait;
            if window_lapsed || waited_out {
                expired.push(self.pending.remove(i));
            } else {
                i += 1;
            }
        }
        for entry in expired {
            // Expiry is the common outcome of occlusion or detector gaps,
            // not an error.
            debug!(
                "prediction for cross track {} (→ screen {}) expired unconfirmed",
                entry.global_id, entry.prediction.target_screen
            );
            self.expired_total += 1;
            self.settle_without_prediction(entry.global_id);
        }
    }

    /// Called whenever a prediction for `global_id` went away without a
    /// confirmation. Restores Active, or terminates an orphaned CrossTrack.
    fn settle_without_prediction(&mut self, global_id: GlobalTrackId) {
        if self.pending.iter().any(|p| p.global_id == global_id) {
            return;
        }
        let Some(cross) = self.cross_tracks.get_mut(&global_id) else {
            return;
        };
        if cross.state == CrossTrackState::PendingHandoff {
            cross.state = CrossTrackState::Active;
            cross.predicted_screens.clear();
        }
        if cross.members.is_empty() {
            cross.state = CrossTrackState::Terminated;
            info!("cross track {global_id} terminated");
            self.cross_tracks.remove(&global_id);
        }
    }

    // ── new track admission: confirm a handoff or mint an identity ──────

    fn admit_new_track(&mut self, stream: ScreenId, obs: &TrackObservation, now_ms: f64) {
        if self.prediction_enabled {
            if let Some(idx) = self.best_pending_for(stream, obs, now_ms) {
                let won = self.pending.remove(idx);
                // Drop every other prediction this identity still has
                // outstanding; it has arrived.
                self.pending.retain(|p| p.global_id != won.global_id);

                if let Some(cross) = self.cross_tracks.get_mut(&won.global_id) {
                    cross.state = CrossTrackState::Active;
                    cross.current_screen = stream;
                    cross.screens_crossed += 1;
                    cross.predicted_screens.clear();
                    cross.velocity = obs.velocity;
                    cross.last_seen_ms = obs.last_seen_ms;
                    cross.members.push((stream, obs.track_id));
                    self.members.insert((stream, obs.track_id), won.global_id);
                    self.confirmed_total += 1;
                    info!(
                        "🔀 handoff confirmed: cross track {} now on screen {stream} \
                         (screens_crossed={})",
                        won.global_id, cross.screens_crossed
                    );
                    return;
                }
                // A pending prediction must always point at a live
                // CrossTrack; anything else is a bookkeeping bug.
                error!(
                    "pending prediction referenced missing cross track {}; minting fresh identity",
                    won.global_id
                );
            }
        }
        self.mint(stream, obs);
    }

    /// Earliest-emitted pending prediction this new track satisfies:
    /// right screen, open arrival window, matching class, entry point
    /// within tolerance. First registered, first served.
    fn best_pending_for(
        &self,
        stream: ScreenId,
        obs: &TrackObservation,
        now_ms: f64,
    ) -> Option<usize> {
        let (cx, cy) = obs.bbox.center();
        let mut best: Option<(usize, f64, (ScreenId, TrackId))> = None;
        for (idx, entry) in self.pending.iter().enumerate() {
            let p = &entry.prediction;
            if p.target_screen != stream || !p.window_contains(now_ms) {
                continue;
            }
            let class_matches = self
                .cross_tracks
                .get(&entry.global_id)
                .map_or(false, |c| c.class == obs.class);
            if !class_matches {
                continue;
            }
            let dx = cx - p.entry_point.0;
            let dy = cy - p.entry_point.1;
            if (dx * dx + dy * dy).sqrt() > self.entry_tolerance {
                continue;
            }
            let key = (p.emitted_ms, (p.source_screen, p.source_track));
            let better = match &best {
                None => true,
                Some((_, best_emitted, best_src)) => {
                    p.emitted_ms < *best_emitted
                        || (p.emitted_ms == *best_emitted && key.1 < *best_src)
                }
            };
            if better {
                best = Some((idx, p.emitted_ms, key.1));
            }
        }
        best.map(|(idx, _, _)| idx)
    }

    fn mint(&mut self, stream: ScreenId, obs: &TrackObservation) {
        let global_id = self.next_global_id;
        self.next_global_id += 1;
        self.cross_tracks.insert(
            global_id,
            CrossTrack {
                id: global_id,
                state: CrossTrackState::Active,
                class: obs.class.clone(),
                current_screen: stream,
                predicted_screens: Vec::new(),
                screens_crossed: 0,
                velocity: obs.velocity,
                last_seen_ms: obs.last_seen_ms,
                members: vec![(stream, obs.track_id)],
            },
        );
        self.members.insert((stream, obs.track_id), global_id);
        debug!(
            "cross track {global_id} minted for stream {stream} track {}",
            obs.track_id
        );
    }

    // ── observation refresh / member release ────────────────────────────

    fn refresh_member(&mut self, stream: ScreenId, obs: &TrackObservation) {
        let Some(&global_id) = self.members.get(&(stream, obs.track_id)) else {
            return;
        };
        let Some(cross) = self.cross_tracks.get_mut(&global_id) else {
            error!(
                "membership for stream {stream} track {} points at missing cross track \
                 {global_id}; clearing",
                obs.track_id
            );
            self.members.remove(&(stream, obs.track_id));
            return;
        };
        // Only the member on the current screen drives the headline fields.
        if cross.current_screen == stream {
            cross.velocity = obs.velocity;
            cross.class = obs.class.clone();
            cross.last_seen_ms = obs.last_seen_ms;
        }
    }

    fn release_member(&mut self, stream: ScreenId, track_id: TrackId) {
        let Some(global_id) = self.members.remove(&(stream, track_id)) else {
            error!(
                "eviction for stream {stream} track {track_id} had no cross track; \
                 registry out of sync"
            );
            return;
        };
        let Some(cross) = self.cross_tracks.get_mut(&global_id) else {
            error!("cross track {global_id} vanished before member release");
            return;
        };
        cross.members.retain(|&m| m != (stream, track_id));
        if cross.members.is_empty() {
            // A pending prediction keeps the identity alive through the
            // off-screen gap between streams.
            self.settle_without_prediction(global_id);
        }
    }

    // ── prediction registration ─────────────────────────────────────────

    fn register_prediction(&mut self, prediction: HandoffPrediction) {
        let key = (prediction.source_screen, prediction.source_track);
        let Some(&global_id) = self.members.get(&key) else {
            error!(
                "prediction from stream {} track {} has no cross track; dropped",
                prediction.source_screen, prediction.source_track
            );
            return;
        };
        if let Some(cross) = self.cross_tracks.get(&global_id) {
            // After a confirmed handoff the departing member lingers on the
            // old screen until eviction; only the member on the current
            // screen may open a new handoff.
            if cross.current_screen != prediction.source_screen {
                debug!(
                    "ignoring prediction from stream {} track {}: cross track {global_id} \
                     is on screen {}",
                    prediction.source_screen, prediction.source_track, cross.current_screen
                );
                return;
            }
        }
        // Superseded, never accumulated.
        self.pending.retain(|p| {
            (p.prediction.source_screen, p.prediction.source_track) != key
        });
        if let Some(cross) = self.cross_tracks.get_mut(&global_id) {
            cross.state = CrossTrackState::PendingHandoff;
            cross.predicted_screens = vec![prediction.target_screen];
        }
        debug!(
            "cross track {global_id} pending handoff → screen {} \
             (window {:.0}..{:.0}ms, conf={:.2})",
            prediction.target_screen,
            prediction.window_start_ms,
            prediction.window_end_ms,
            prediction.confidence
        );
        self.pending.push(PendingPrediction {
            prediction,
            global_id,
            source_cycles: 0,
        });
    }

    fn clear_prediction(&mut self, stream: ScreenId, track_id: TrackId) {
        let before = self.pending.len();
        let mut cleared_gid = None;
        self.pending.retain(|p| {
            let matches = (p.prediction.source_screen, p.prediction.source_track)
                == (stream, track_id);
            if matches {
                cleared_gid = Some(p.global_id);
            }
            !matches
        });
        if self.pending.len() != before {
            if let Some(global_id) = cleared_gid {
                self.settle_without_prediction(global_id);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
