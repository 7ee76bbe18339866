// src/velocity.rs
//
// Exponentially-weighted centroid velocity from a track's sample history,
// plus a direction-stability counter the predictor uses to scale handoff
// confidence. Units are normalized frame widths/heights per second.

use serde::Serialize;

/// Instantaneous velocities below this magnitude are treated as noise and
/// do not advance the stability counter.
const MIN_SPEED: f32 = 1e-3;

/// Cosine threshold for "same direction as the smoothed trend".
const DIRECTION_STABLE_MIN_COS: f32 = 0.90;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VelocityEstimate {
    pub vx: f32,
    pub vy: f32,
    /// Consecutive frames the instantaneous direction agreed with the trend.
    pub stable_frames: u32,
    defined: bool,
}

impl VelocityEstimate {
    pub fn undefined() -> Self {
        Self {
            vx: 0.0,
            vy: 0.0,
            stable_frames: 0,
            defined: false,
        }
    }

    /// With fewer than two samples there is no displacement to divide;
    /// callers must treat this as "no prediction possible".
    pub fn is_defined(&self) -> bool {
        self.defined
    }

    pub fn speed(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct VelocityEstimator {
    alpha: f32,
    vx: f32,
    vy: f32,
    observations: u32,
    stable_frames: u32,
}

impl VelocityEstimator {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            vx: 0.0,
            vy: 0.0,
            observations: 0,
            stable_frames: 0,
        }
    }

    /// Feed one consecutive centroid displacement. `dt_s` is the elapsed
    /// time between the two samples; non-positive intervals are discarded
    /// (duplicate or reordered frame timestamps from the detector).
    pub fn observe(&mut self, dx: f32, dy: f32, dt_s: f64) {
        if dt_s <= 1e-4 {
            return;
        }
        let inst_vx = dx / dt_s as f32;
        let inst_vy = dy / dt_s as f32;

        // Stability is judged against the trend as it stood before this
        // sample is blended in; the post-blend trend follows a hard reversal
        // and would read as agreement.
        let (prev_vx, prev_vy) = (self.vx, self.vy);
        let had_trend = self.observations > 0;

        if !had_trend {
            self.vx = inst_vx;
            self.vy = inst_vy;
        } else {
            self.vx = self.alpha * inst_vx + (1.0 - self.alpha) * self.vx;
            self.vy = self.alpha * inst_vy + (1.0 - self.alpha) * self.vy;
        }
        self.observations += 1;

        let inst_speed = (inst_vx * inst_vx + inst_vy * inst_vy).sqrt();
        let prev_speed = (prev_vx * prev_vx + prev_vy * prev_vy).sqrt();
        if had_trend && inst_speed > MIN_SPEED && prev_speed > MIN_SPEED {
            let cos = (inst_vx * prev_vx + inst_vy * prev_vy) / (inst_speed * prev_speed);
            if cos >= DIRECTION_STABLE_MIN_COS {
                self.stable_frames += 1;
            } else {
                self.stable_frames = 0;
            }
        } else {
            self.stable_frames = 0;
        }
    }

    pub fn estimate(&self) -> VelocityEstimate {
        if self.observations == 0 {
            return VelocityEstimate::undefined();
        }
        VelocityEstimate {
            vx: self.vx,
            vy: self.vy,
            stable_frames: self.stable_frames,
            defined: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_S: f64 = 1.0 / 30.0;

    #[test]
    fn test_undefined_before_any_displacement() {
        let estimator = VelocityEstimator::new(0.66);
        let estimate = estimator.estimate();
        assert!(!estimate.is_defined());
        assert_eq!(estimate.vx, 0.0);
        assert_eq!(estimate.stable_frames, 0);
    }

    #[test]
    fn test_constant_motion_converges() {
        let mut estimator = VelocityEstimator::new(0.66);
        // 0.01 per frame at 30fps = 0.3 widths/sec.
        for _ in 0..10 {
            estimator.observe(0.01, 0.0, FRAME_S);
        }
        let estimate = estimator.estimate();
        assert!(estimate.is_defined());
        assert!((estimate.vx - 0.3).abs() < 1e-3);
        assert!(estimate.vy.abs() < 1e-6);
    }

    #[test]
    fn test_recent_samples_dominate() {
        let mut estimator = VelocityEstimator::new(0.66);
        for _ in 0..10 {
            estimator.observe(0.01, 0.0, FRAME_S);
        }
        // Motion doubles; the EWMA should be much closer to the new rate
        // than to the old one after a few frames.
        for _ in 0..3 {
            estimator.observe(0.02, 0.0, FRAME_S);
        }
        let vx = estimator.estimate().vx;
        assert!(vx > 0.5, "EWMA too sluggish: {vx}");
    }

    #[test]
    fn test_stability_counter_grows_then_resets() {
        let mut estimator = VelocityEstimator::new(0.66);
        for _ in 0..6 {
            estimator.observe(0.01, 0.0, FRAME_S);
        }
        let stable_before = estimator.estimate().stable_frames;
        assert!(stable_before >= 5);

        // Direction reversal kills the streak, even though the blended
        // trend flips sign along with the sample.
        estimator.observe(-0.01, 0.0, FRAME_S);
        assert_eq!(estimator.estimate().stable_frames, 0);
    }

    #[test]
    fn test_alternating_direction_never_accumulates_stability() {
        let mut estimator = VelocityEstimator::new(0.66);
        for frame in 0..8 {
            let dx = if frame % 2 == 0 { 0.01 } else { -0.01 };
            estimator.observe(dx, 0.0, FRAME_S);
        }
        assert_eq!(estimator.estimate().stable_frames, 0);
    }

    #[test]
    fn test_zero_dt_discarded() {
        let mut estimator = VelocityEstimator::new(0.66);
        estimator.observe(0.5, 0.5, 0.0);
        assert!(!estimator.estimate().is_defined());
    }
}
