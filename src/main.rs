// src/main.rs

mod config;
mod engine;
mod metrics;
mod predictor;
mod registry;
mod snapshot;
mod topology;
mod tracker;
mod types;
mod velocity;

use anyhow::Result;
use engine::StreamFrame;
use std::path::Path;
use std::time::Duration;
use topology::{Edge, ScreenTopology};
use tracing::{info, warn};
use types::{BoundingBox, Config, Detection, ScreenId};

const CONFIG_PATH: &str = "config.yaml";
const SIM_FPS: f64 = 30.0;

#[tokio::main]
async fn main() -> Result<()> {
    let config = if Path::new(CONFIG_PATH).exists() {
        Config::load(CONFIG_PATH)?
    } else {
        Config::default()
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🛰️ Cross-Screen Tracking Engine Starting");
    if Path::new(CONFIG_PATH).exists() {
        info!("✓ Configuration loaded from {CONFIG_PATH}");
    } else {
        warn!("{CONFIG_PATH} not found, using built-in defaults");
    }
    info!(
        "Wall: {}x{} screens, handoff={}, lookahead={:.0}ms, snapshot every {}ms",
        config.grid.rows,
        config.grid.cols,
        if config.handoff.enabled { "on" } else { "off" },
        config.handoff.lookahead_ms,
        config.snapshot.interval_ms
    );

    let handle = engine::spawn(config.clone())?;

    // Simulated detector streams: a few objects drifting across the wall,
    // hopping screens at the edges. Stands in for real per-camera detectors.
    let topology = ScreenTopology::new(config.grid.rows, config.grid.cols)?;
    let feeds: Vec<_> = topology
        .screens()
        .map(|s| (s, handle.feed(s).expect("feed for every screen")))
        .collect();
    let sim = tokio::spawn(async move {
        let mut movers = vec![
            SimulatedObject::new(0, 0.15, 0.40, 0.22, 0.00, "drone"),
            SimulatedObject::new(4, 0.80, 0.30, -0.18, 0.05, "drone"),
            SimulatedObject::new(2, 0.50, 0.20, 0.00, 0.15, "bird"),
        ];
        let mut ticker =
            tokio::time::interval(Duration::from_secs_f64(1.0 / SIM_FPS));
        let mut now_ms = 0.0f64;
        loop {
            ticker.tick().await;
            now_ms += 1000.0 / SIM_FPS;
            for mover in &mut movers {
                mover.advance(&topology, 1.0 / SIM_FPS as f32);
            }
            for (screen, feed) in &feeds {
                let detections: Vec<Detection> = movers
                    .iter()
                    .filter(|m| m.screen == *screen)
                    .map(|m| m.detection(now_ms))
                    .collect();
                let frame = StreamFrame {
                    detections,
                    timestamp_ms: now_ms,
                };
                if feed.send(frame).await.is_err() {
                    return;
                }
            }
        }
    });

    // Periodic wall status from the latest snapshot.
    let mut snapshots = handle.snapshots();
    let status = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            ticker.tick().await;
            let snapshot = snapshots.borrow_and_update().clone();
            let crossings: u32 = snapshot
                .cross_tracks
                .iter()
                .map(|c| c.screens_crossed)
                .sum();
            info!(
                "📸 snapshot #{}: {} live tracks, {} identities, {} total crossings",
                snapshot.sequence,
                snapshot.detections.len(),
                snapshot.cross_tracks.len(),
                crossings
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    sim.abort();
    status.abort();

    let summary = handle.metrics().summary();
    info!("\n========================================");
    info!("Shutting down after {:.1}s", summary.elapsed_secs);
    info!("  Frames processed:    {}", summary.frames_processed);
    info!("  Throughput:          {:.1} fps", summary.fps);
    info!("  Tracks spawned:      {}", summary.tracks_spawned);
    info!("  Tracks evicted:      {}", summary.tracks_evicted);
    info!("  Detections dropped:  {}", summary.detections_dropped);
    info!("  Predictions emitted: {}", summary.predictions_emitted);
    info!("  Handoffs confirmed:  {}", summary.handoffs_confirmed);
    info!("  Predictions expired: {}", summary.predictions_expired);
    info!("  Snapshots published: {}", summary.snapshots_published);
    info!("========================================");

    Ok(())
}

/// One synthetic object on the wall. Bounces off outer edges, crosses onto
/// the neighbor at inner ones.
struct SimulatedObject {
    screen: ScreenId,
    cx: f32,
    cy: f32,
    vx: f32,
    vy: f32,
    class: &'static str,
}

impl SimulatedObject {
    const SIZE: f32 = 0.08;

    fn new(screen: ScreenId, cx: f32, cy: f32, vx: f32, vy: f32, class: &'static str) -> Self {
        Self {
            screen,
            cx,
            cy,
            vx,
            vy,
            class,
        }
    }

    fn advance(&mut self, topology: &ScreenTopology, dt_s: f32) {
        self.cx += self.vx * dt_s;
        self.cy += self.vy * dt_s;

        for (crossed, edge) in [
            (self.cx > 1.0, Edge::Right),
            (self.cx < 0.0, Edge::Left),
            (self.cy > 1.0, Edge::Bottom),
            (self.cy < 0.0, Edge::Top),
        ] {
            if !crossed {
                continue;
            }
            match topology.neighbor_of(self.screen, edge) {
                Some((neighbor, transform)) => {
                    self.screen = neighbor;
                    match edge {
                        Edge::Right => {
                            self.cy = transform.apply(self.cy);
                            self.cx -= 1.0;
                        }
                        Edge::Left => {
                            self.cy = transform.apply(self.cy);
                            self.cx += 1.0;
                        }
                        Edge::Bottom => {
                            self.cx = transform.apply(self.cx);
                            self.cy -= 1.0;
                        }
                        Edge::Top => {
                            self.cx = transform.apply(self.cx);
                            self.cy += 1.0;
                        }
                    }
                }
                None => match edge {
                    Edge::Right | Edge::Left => {
                        self.vx = -self.vx;
                        self.cx = self.cx.clamp(0.0, 1.0);
                    }
                    Edge::Top | Edge::Bottom => {
                        self.vy = -self.vy;
                        self.cy = self.cy.clamp(0.0, 1.0);
                    }
                },
            }
        }
    }

    fn detection(&self, timestamp_ms: f64) -> Detection {
        let half = Self::SIZE * 0.5;
        // Keep the box inside the frame so it survives validation even when
        // the center sits right on an edge.
        let x = (self.cx - half).clamp(0.0, 1.0 - Self::SIZE);
        let y = (self.cy - half).clamp(0.0, 1.0 - Self::SIZE);
        Detection {
            stream_id: self.screen,
            bbox: BoundingBox::new(x, y, Self::SIZE, Self::SIZE),
            class: self.class.to_string(),
            confidence: 0.9,
            timestamp_ms,
        }
    }
}
