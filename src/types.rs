use serde::{Deserialize, Serialize};

pub type ScreenId = u32;
pub type TrackId = u64;
pub type GlobalTrackId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub velocity: VelocityConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Field-level defaults so a partially-specified section in the YAML still
// parses; a missing section falls back through the struct Default.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_grid_rows")]
    pub rows: u32,
    #[serde(default = "default_grid_cols")]
    pub cols: u32,
}

fn default_grid_rows() -> u32 {
    2
}
fn default_grid_cols() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Frames a track survives without a matching detection, and the
    /// capacity of its (position, timestamp) sample buffer.
    #[serde(default = "default_memory_window")]
    pub memory_window: u32,
    /// Minimum combined affinity (overlap + class agreement) to match a
    /// detection to an existing track.
    #[serde(default = "default_min_affinity")]
    pub min_affinity: f32,
    /// Detections below this confidence are ignored entirely.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_memory_window() -> u32 {
    30
}
fn default_min_affinity() -> f32 {
    0.30
}
fn default_min_confidence() -> f32 {
    0.20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityConfig {
    /// EWMA smoothing factor for frame-to-frame centroid displacement.
    /// 0.66 weights the newest sample roughly 2x the accumulated history.
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
}

fn default_smoothing() -> f32 {
    0.66
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Master switch. When false the predictor is bypassed and cross-screen
    /// identity never transitions; detections keep per-stream identity only.
    #[serde(default = "default_handoff_enabled")]
    pub enabled: bool,
    /// How far ahead an edge crossing may be and still produce a prediction.
    /// 1000ms = one memory window at 30 fps.
    #[serde(default = "default_lookahead_ms")]
    pub lookahead_ms: f64,
    /// Half-width of the arrival-time window around the predicted crossing,
    /// before stability tightening.
    #[serde(default = "default_arrival_tolerance_ms")]
    pub arrival_tolerance_ms: f64,
    /// Maximum normalized distance between a new track's first centroid and
    /// the predicted entry point for a handoff confirmation.
    #[serde(default = "default_entry_tolerance")]
    pub entry_tolerance: f32,
    /// Hard cap: a pending prediction expires after this many tracking
    /// cycles on its source stream, window or not.
    #[serde(default = "default_max_wait_frames")]
    pub max_wait_frames: u32,
}

fn default_handoff_enabled() -> bool {
    true
}
fn default_lookahead_ms() -> f64 {
    1000.0
}
fn default_arrival_tolerance_ms() -> f64 {
    400.0
}
fn default_entry_tolerance() -> f32 {
    0.15
}
fn default_max_wait_frames() -> u32 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Publication cadence for the broadcast snapshot.
    #[serde(default = "default_snapshot_interval_ms")]
    pub interval_ms: u64,
}

fn default_snapshot_interval_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: default_grid_rows(),
            cols: default_grid_cols(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            memory_window: default_memory_window(),
            min_affinity: default_min_affinity(),
            min_confidence: default_min_confidence(),
        }
    }
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            smoothing: default_smoothing(),
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            enabled: default_handoff_enabled(),
            lookahead_ms: default_lookahead_ms(),
            arrival_tolerance_ms: default_arrival_tolerance_ms(),
            entry_tolerance: default_entry_tolerance(),
            max_wait_frames: default_max_wait_frames(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_snapshot_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            tracker: TrackerConfig::default(),
            velocity: VelocityConfig::default(),
            handoff: HandoffConfig::default(),
            snapshot: SnapshotConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Axis-aligned box in normalized frame coordinates (0..1 on both axes).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w * 0.5, self.y + self.h * 0.5)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Detector output is untrusted; anything degenerate or outside the
    /// frame is rejected here and dropped upstream.
    pub fn is_valid(&self) -> bool {
        let finite =
            self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite();
        finite
            && self.w > 0.0
            && self.h > 0.0
            && self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.w <= 1.0
            && self.y + self.h <= 1.0
    }

    /// Same box shifted by a velocity over `dt_s` seconds, for matching
    /// against detections at a later frame time.
    pub fn extrapolated(&self, vx: f32, vy: f32, dt_s: f32) -> BoundingBox {
        BoundingBox {
            x: self.x + vx * dt_s,
            y: self.y + vy * dt_s,
            w: self.w,
            h: self.h,
        }
    }
}

/// One detector output for one frame. Ephemeral: consumed by the stream
/// tracker and not retained beyond its track update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub stream_id: ScreenId,
    pub bbox: BoundingBox,
    pub class: String,
    pub confidence: f32,
    pub timestamp_ms: f64,
}

impl Detection {
    pub fn is_valid(&self) -> bool {
        self.bbox.is_valid()
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
            && !self.class.is_empty()
            && self.timestamp_ms.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(x, y, w, h)
    }

    #[test]
    fn test_bbox_center() {
        let b = bbox(0.2, 0.4, 0.2, 0.2);
        let (cx, cy) = b.center();
        assert!((cx - 0.3).abs() < 1e-6);
        assert!((cy - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_validation_rejects_out_of_range() {
        assert!(bbox(0.1, 0.1, 0.2, 0.2).is_valid());
        assert!(!bbox(0.9, 0.1, 0.2, 0.2).is_valid()); // spills past right edge
        assert!(!bbox(-0.1, 0.1, 0.2, 0.2).is_valid());
        assert!(!bbox(0.1, 0.1, 0.0, 0.2).is_valid());
        assert!(!bbox(f32::NAN, 0.1, 0.2, 0.2).is_valid());
    }

    #[test]
    fn test_detection_validation() {
        let mut det = Detection {
            stream_id: 0,
            bbox: bbox(0.1, 0.1, 0.2, 0.2),
            class: "drone".to_string(),
            confidence: 0.8,
            timestamp_ms: 0.0,
        };
        assert!(det.is_valid());
        det.confidence = 1.5;
        assert!(!det.is_valid());
        det.confidence = 0.8;
        det.class.clear();
        assert!(!det.is_valid());
    }

    #[test]
    fn test_bbox_extrapolation() {
        let b = bbox(0.4, 0.4, 0.2, 0.2).extrapolated(0.5, -0.25, 0.2);
        assert!((b.x - 0.5).abs() < 1e-6);
        assert!((b.y - 0.35).abs() < 1e-6);
    }
}
