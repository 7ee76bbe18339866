// src/topology.rs
//
// Static description of the camera wall: which screen sits next to which,
// and how an exit coordinate on one screen's edge maps onto the neighbor's
// opposite edge. Built once at startup, validated, then shared read-only
// by every predictor.

use crate::types::ScreenId;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

impl Edge {
    pub fn opposite(self) -> Edge {
        match self {
            Edge::Top => Edge::Bottom,
            Edge::Bottom => Edge::Top,
            Edge::Left => Edge::Right,
            Edge::Right => Edge::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Edge::Top => "top",
            Edge::Bottom => "bottom",
            Edge::Left => "left",
            Edge::Right => "right",
        }
    }
}

/// Maps a 1-D coordinate along an exit edge to the coordinate along the
/// neighbor's matching edge. For an axis-aligned wall every pair is the
/// identity; the flipped form is kept for mirrored mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeTransform {
    flipped: bool,
}

impl EdgeTransform {
    pub fn identity() -> Self {
        Self { flipped: false }
    }

    pub fn flipped() -> Self {
        Self { flipped: true }
    }

    pub fn apply(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        if self.flipped {
            1.0 - t
        } else {
            t
        }
    }
}

/// Row-major grid of screens. Screen 0 is top-left; a 2x3 wall is
///
/// ```text
///   0 1 2
///   3 4 5
/// ```
#[derive(Debug, Clone)]
pub struct ScreenTopology {
    rows: u32,
    cols: u32,
}

impl ScreenTopology {
    pub fn new(rows: u32, cols: u32) -> Result<Self> {
        if rows == 0 || cols == 0 {
            bail!("screen grid must be at least 1x1 (got {rows}x{cols})");
        }
        Ok(Self { rows, cols })
    }

    pub fn screen_count(&self) -> u32 {
        self.rows * self.cols
    }

    pub fn screens(&self) -> impl Iterator<Item = ScreenId> {
        0..self.screen_count()
    }

    pub fn contains(&self, screen: ScreenId) -> bool {
        screen < self.screen_count()
    }

    fn position(&self, screen: ScreenId) -> (u32, u32) {
        assert!(
            self.contains(screen),
            "screen {screen} outside validated {}x{} topology",
            self.rows,
            self.cols
        );
        (screen / self.cols, screen % self.cols)
    }

    fn screen_at(&self, row: i64, col: i64) -> Option<ScreenId> {
        if row < 0 || col < 0 || row >= self.rows as i64 || col >= self.cols as i64 {
            return None;
        }
        Some(row as u32 * self.cols + col as u32)
    }

    /// Which screen, if any, sits past `edge` of `screen`, and how the exit
    /// coordinate along that edge maps to the entry coordinate. Pure lookup;
    /// an out-of-range screen id is a programmer error and asserts.
    pub fn neighbor_of(&self, screen: ScreenId, edge: Edge) -> Option<(ScreenId, EdgeTransform)> {
        let (row, col) = self.position(screen);
        let (row, col) = (row as i64, col as i64);
        let neighbor = match edge {
            Edge::Top => self.screen_at(row - 1, col),
            Edge::Bottom => self.screen_at(row + 1, col),
            Edge::Left => self.screen_at(row, col - 1),
            Edge::Right => self.screen_at(row, col + 1),
        }?;
        Some((neighbor, EdgeTransform::identity()))
    }

    /// Exhaustive adjacency check run once at startup: every neighbor link
    /// must be symmetric through the opposite edge. Anything else is a
    /// construction bug, caught before the first frame.
    pub fn validate(&self) -> Result<()> {
        for screen in self.screens() {
            for edge in [Edge::Top, Edge::Bottom, Edge::Left, Edge::Right] {
                if let Some((neighbor, _)) = self.neighbor_of(screen, edge) {
                    if !self.contains(neighbor) {
                        bail!(
                            "screen {screen} edge {} points at nonexistent screen {neighbor}",
                            edge.as_str()
                        );
                    }
                    match self.neighbor_of(neighbor, edge.opposite()) {
                        Some((back, _)) if back == screen => {}
                        other => bail!(
                            "asymmetric adjacency: {screen} -{}-> {neighbor} but reverse lookup gave {other:?}",
                            edge.as_str()
                        ),
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall() -> ScreenTopology {
        ScreenTopology::new(2, 3).unwrap()
    }

    #[test]
    fn test_grid_dimensions() {
        let topo = wall();
        assert_eq!(topo.screen_count(), 6);
        assert!(topo.contains(5));
        assert!(!topo.contains(6));
    }

    #[test]
    fn test_horizontal_neighbors() {
        let topo = wall();
        assert_eq!(topo.neighbor_of(0, Edge::Right).unwrap().0, 1);
        assert_eq!(topo.neighbor_of(1, Edge::Left).unwrap().0, 0);
        assert_eq!(topo.neighbor_of(1, Edge::Right).unwrap().0, 2);
        assert!(topo.neighbor_of(0, Edge::Left).is_none());
        assert!(topo.neighbor_of(2, Edge::Right).is_none());
    }

    #[test]
    fn test_vertical_neighbors() {
        let topo = wall();
        assert_eq!(topo.neighbor_of(0, Edge::Bottom).unwrap().0, 3);
        assert_eq!(topo.neighbor_of(3, Edge::Top).unwrap().0, 0);
        assert_eq!(topo.neighbor_of(5, Edge::Top).unwrap().0, 2);
        assert!(topo.neighbor_of(0, Edge::Top).is_none());
        assert!(topo.neighbor_of(4, Edge::Bottom).is_none());
    }

    #[test]
    fn test_transform_is_identity_on_straight_adjacency() {
        let topo = wall();
        let (_, transform) = topo.neighbor_of(0, Edge::Right).unwrap();
        assert!((transform.apply(0.4) - 0.4).abs() < 1e-6);
        assert!((EdgeTransform::flipped().apply(0.4) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_validation_passes_for_grid() {
        assert!(wall().validate().is_ok());
        assert!(ScreenTopology::new(1, 1).unwrap().validate().is_ok());
    }

    #[test]
    fn test_degenerate_grid_rejected() {
        assert!(ScreenTopology::new(0, 3).is_err());
        assert!(ScreenTopology::new(2, 0).is_err());
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_screen_asserts() {
        wall().neighbor_of(42, Edge::Left);
    }
}
