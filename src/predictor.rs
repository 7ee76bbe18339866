// src/predictor.rs
//
// Edge-exit forecasting. For a track with a defined velocity, extrapolates
// the centroid linearly, finds the first screen edge it would cross, and —
// when the topology has a neighbor past that edge within the lookahead
// horizon — emits a handoff prediction with a transformed entry point and
// an arrival window. The window tightens and confidence rises with the
// number of consecutive frames the velocity direction has been stable.

use crate::topology::{Edge, ScreenTopology};
use crate::tracker::Track;
use crate::types::{HandoffConfig, ScreenId, TrackId};
use std::sync::Arc;
use tracing::debug;

/// Velocity components below this are treated as pointing nowhere.
const MIN_EDGE_SPEED: f32 = 1e-3;

/// Stability saturates here: beyond 20 straight frames of a steady heading
/// the window is as tight as it gets.
const STABILITY_SATURATION: u32 = 20;

#[derive(Debug, Clone)]
pub struct HandoffPrediction {
    pub source_screen: ScreenId,
    pub source_track: TrackId,
    pub target_screen: ScreenId,
    /// Normalized coordinates on the target screen.
    pub entry_point: (f32, f32),
    pub window_start_ms: f64,
    pub window_end_ms: f64,
    pub velocity: (f32, f32),
    pub confidence: f32,
    pub emitted_ms: f64,
}

impl HandoffPrediction {
    pub fn window_contains(&self, timestamp_ms: f64) -> bool {
        timestamp_ms >= self.window_start_ms && timestamp_ms <= self.window_end_ms
    }
}

pub struct HandoffPredictor {
    topology: Arc<ScreenTopology>,
    config: HandoffConfig,
}

impl HandoffPredictor {
    pub fn new(topology: Arc<ScreenTopology>, config: HandoffConfig) -> Self {
        Self { topology, config }
    }

    /// One prediction per track per frame, superseding whatever the track
    /// predicted before. None when velocity is undefined, no edge is
    /// reachable inside the horizon, or nothing sits past the edge.
    pub fn predict(&self, track: &Track, now_ms: f64) -> Option<HandoffPrediction> {
        let estimate = track.velocity();
        if !estimate.is_defined() {
            return None;
        }
        let (cx, cy) = track.center();
        let (vx, vy) = (estimate.vx, estimate.vy);

        // Time to each edge whose velocity component points outward.
        let mut first_crossing: Option<(Edge, f32)> = None;
        let candidates = [
            (Edge::Right, if vx > MIN_EDGE_SPEED { Some((1.0 - cx) / vx) } else { None }),
            (Edge::Left, if vx < -MIN_EDGE_SPEED { Some(cx / -vx) } else { None }),
            (Edge::Bottom, if vy > MIN_EDGE_SPEED { Some((1.0 - cy) / vy) } else { None }),
            (Edge::Top, if vy < -MIN_EDGE_SPEED { Some(cy / -vy) } else { None }),
        ];
        for (edge, time) in candidates {
            if let Some(t) = time {
                if t >= 0.0 && first_crossing.map_or(true, |(_, best)| t < best) {
                    first_crossing = Some((edge, t));
                }
            }
        }
        let (edge, t_s) = first_crossing?;

        let t_ms = t_s as f64 * 1000.0;
        if t_ms > self.config.lookahead_ms {
            return None;
        }

        let (neighbor, transform) = self.topology.neighbor_of(track.stream_id, edge)?;

        // 1-D coordinate along the exit edge, carried onto the neighbor.
        let exit_coord = match edge {
            Edge::Left | Edge::Right => (cy + vy * t_s).clamp(0.0, 1.0),
            Edge::Top | Edge::Bottom => (cx + vx * t_s).clamp(0.0, 1.0),
        };
        let entry_coord = transform.apply(exit_coord);
        let entry_point = match edge {
            Edge::Right => (0.0, entry_coord),
            Edge::Left => (1.0, entry_coord),
            Edge::Bottom => (entry_coord, 0.0),
            Edge::Top => (entry_coord, 1.0),
        };

        // A long steady heading earns a tighter window and more confidence.
        let stability =
            (estimate.stable_frames as f64 / STABILITY_SATURATION as f64).min(1.0);
        let tolerance_ms = self.config.arrival_tolerance_ms * (1.0 - 0.5 * stability);
        let crossing_ms = now_ms + t_ms;

        let prediction = HandoffPrediction {
            source_screen: track.stream_id,
            source_track: track.id,
            target_screen: neighbor,
            entry_point,
            window_start_ms: crossing_ms - tolerance_ms,
            window_end_ms: crossing_ms + tolerance_ms,
            velocity: (vx, vy),
            confidence: stability_confidence(estimate.stable_frames),
            emitted_ms: now_ms,
        };
        debug!(
            stream = track.stream_id,
            "track {} exits {} in {:.0}ms → screen {} at ({:.2},{:.2}) conf={:.2}",
            track.id,
            edge.as_str(),
            t_ms,
            neighbor,
            entry_point.0,
            entry_point.1,
            prediction.confidence
        );
        Some(prediction)
    }
}

fn stability_confidence(stable_frames: u32) -> f32 {
    if stable_frames >= 20 {
        0.95
    } else if stable_frames >= 10 {
        0.80
    } else if stable_frames >= 5 {
        0.65
    } else if stable_frames >= 2 {
        0.50
    } else {
        0.35
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::StreamTracker;
    use crate::types::{BoundingBox, Detection, TrackerConfig, VelocityConfig};

    const FRAME_MS: f64 = 1000.0 / 30.0;

    fn topology() -> Arc<ScreenTopology> {
        Arc::new(ScreenTopology::new(2, 3).unwrap())
    }

    fn det(stream: ScreenId, x: f32, y: f32, ts: f64) -> Detection {
        Detection {
            stream_id: stream,
            bbox: BoundingBox::new(x, y, 0.1, 0.1),
            class: "drone".to_string(),
            confidence: 0.9,
            timestamp_ms: ts,
        }
    }

    /// Track on `stream` moving with per-frame displacement (dx, dy),
    /// starting from (x0, y0), over `frames` frames.
    fn moving_track(
        stream: ScreenId,
        x0: f32,
        y0: f32,
        dx: f32,
        dy: f32,
        frames: u32,
    ) -> (Track, f64) {
        let mut tracker =
            StreamTracker::new(stream, TrackerConfig::default(), &VelocityConfig::default());
        let mut last_ts = 0.0;
        for frame in 0..frames {
            last_ts = frame as f64 * FRAME_MS;
            let d = det(
                stream,
                x0 + frame as f32 * dx,
                y0 + frame as f32 * dy,
                last_ts,
            );
            tracker.observe(&[d], last_ts);
        }
        assert_eq!(tracker.tracks().len(), 1, "helper should keep one track");
        (tracker.tracks()[0].clone(), last_ts)
    }

    #[test]
    fn test_rightward_track_predicts_neighbor_entry() {
        // Screen 0, moving right at constant velocity toward screen 1,
        // centered at y=0.45 (bbox y=0.4, h=0.1).
        let (track, now) = moving_track(0, 0.50, 0.40, 0.05, 0.0, 5);
        let predictor = HandoffPredictor::new(topology(), HandoffConfig::default());

        let prediction = predictor.predict(&track, now).expect("prediction expected");
        assert_eq!(prediction.target_screen, 1);
        assert_eq!(prediction.source_screen, 0);
        assert_eq!(prediction.source_track, track.id);
        // Straight horizontal adjacency: exit y maps to entry y unchanged.
        assert!((prediction.entry_point.0 - 0.0).abs() < 1e-6);
        assert!((prediction.entry_point.1 - 0.45).abs() < 1e-3);
        assert!(prediction.window_start_ms < prediction.window_end_ms);
        // cx=0.75 moving at 1.5 widths/s → crossing ~167ms out.
        assert!(prediction.window_contains(now + 167.0));
    }

    #[test]
    fn test_no_neighbor_no_prediction() {
        // Screen 2 is the top-right corner; rightward exit leads nowhere.
        let (track, now) = moving_track(2, 0.50, 0.40, 0.05, 0.0, 5);
        let predictor = HandoffPredictor::new(topology(), HandoffConfig::default());
        assert!(predictor.predict(&track, now).is_none());
    }

    #[test]
    fn test_undefined_velocity_no_prediction() {
        let (track, now) = moving_track(0, 0.80, 0.40, 0.0, 0.0, 1);
        let predictor = HandoffPredictor::new(topology(), HandoffConfig::default());
        assert!(predictor.predict(&track, now).is_none());
    }

    #[test]
    fn test_crossing_beyond_lookahead_suppressed() {
        let mut config = HandoffConfig::default();
        config.lookahead_ms = 50.0; // far too short for this mover
        let (track, now) = moving_track(0, 0.50, 0.40, 0.05, 0.0, 5);
        let predictor = HandoffPredictor::new(topology(), config);
        assert!(predictor.predict(&track, now).is_none());
    }

    #[test]
    fn test_downward_exit_maps_to_lower_row() {
        let (track, now) = moving_track(1, 0.40, 0.60, 0.0, 0.04, 6);
        let predictor = HandoffPredictor::new(topology(), HandoffConfig::default());
        let prediction = predictor.predict(&track, now).expect("prediction expected");
        assert_eq!(prediction.target_screen, 4);
        // Entry along the target's top edge at the same x.
        assert!((prediction.entry_point.1 - 0.0).abs() < 1e-6);
        assert!((prediction.entry_point.0 - 0.45).abs() < 1e-3);
    }

    #[test]
    fn test_stable_heading_tightens_window_and_raises_confidence() {
        let predictor = HandoffPredictor::new(topology(), HandoffConfig::default());

        let (wobbly, now_a) = moving_track(0, 0.60, 0.40, 0.05, 0.0, 3);
        let (steady, now_b) = moving_track(0, 0.30, 0.40, 0.05, 0.0, 12);

        let loose = predictor.predict(&wobbly, now_a).expect("prediction");
        let tight = predictor.predict(&steady, now_b).expect("prediction");

        let loose_width = loose.window_end_ms - loose.window_start_ms;
        let tight_width = tight.window_end_ms - tight.window_start_ms;
        assert!(tight_width < loose_width);
        assert!(tight.confidence > loose.confidence);
    }
}
