// src/engine.rs
//
// Wires the whole wall together. One worker task per stream owns that
// stream's tracker and predictor; a single registry task owns cross-screen
// state and the snapshot aggregator. Everything between them is message
// passing — no shared mutable tracking state, no locks on the hot path.
//
//   detections ──▶ [stream worker 0..N] ──StreamUpdate──▶ [registry task]
//                                                              │
//                                  watch::Sender<Arc<Snapshot>>┘

use crate::metrics::EngineMetrics;
use crate::predictor::HandoffPredictor;
use crate::registry::{CrossScreenRegistry, StreamUpdate, TrackObservation};
use crate::snapshot::{Snapshot, SnapshotAggregator};
use crate::topology::ScreenTopology;
use crate::tracker::StreamTracker;
use crate::types::{Config, Detection, ScreenId, TrackId};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// One frame's worth of detector output for one stream.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    pub detections: Vec<Detection>,
    pub timestamp_ms: f64,
}

/// Handle to a running engine. Dropping it (and every cloned feed) shuts
/// the workers down; the registry task publishes a final snapshot and exits.
pub struct EngineHandle {
    feeds: HashMap<ScreenId, mpsc::Sender<StreamFrame>>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    metrics: EngineMetrics,
}

impl EngineHandle {
    /// Ingestion endpoint for one screen's detector. None for a screen id
    /// outside the configured grid.
    pub fn feed(&self, screen: ScreenId) -> Option<mpsc::Sender<StreamFrame>> {
        self.feeds.get(&screen).cloned()
    }

    pub fn snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}

/// Build the topology, spawn one worker per screen plus the registry task,
/// and hand back the feeds.
pub fn spawn(config: Config) -> Result<EngineHandle> {
    let topology = Arc::new(ScreenTopology::new(config.grid.rows, config.grid.cols)?);
    topology.validate()?;

    let metrics = EngineMetrics::new();
    let (update_tx, update_rx) = mpsc::channel::<StreamUpdate>(256);
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot::empty()));

    let mut feeds = HashMap::new();
    for screen in topology.screens() {
        let (frame_tx, frame_rx) = mpsc::channel::<StreamFrame>(64);
        feeds.insert(screen, frame_tx);
        tokio::spawn(stream_worker(
            screen,
            config.clone(),
            Arc::clone(&topology),
            frame_rx,
            update_tx.clone(),
            metrics.clone(),
        ));
    }
    // Workers hold the only remaining update senders; the registry task
    // ends when the last worker does.
    drop(update_tx);

    tokio::spawn(registry_task(
        config.clone(),
        update_rx,
        snapshot_tx,
        metrics.clone(),
    ));

    info!(
        "🚀 engine up: {}x{} wall, {} streams, snapshots every {}ms",
        config.grid.rows,
        config.grid.cols,
        topology.screen_count(),
        config.snapshot.interval_ms
    );

    Ok(EngineHandle {
        feeds,
        snapshots: snapshot_rx,
        metrics,
    })
}

/// Owns one stream's tracker and predictor. Consumes frames until its feed
/// closes.
async fn stream_worker(
    screen: ScreenId,
    config: Config,
    topology: Arc<ScreenTopology>,
    mut frames: mpsc::Receiver<StreamFrame>,
    updates: mpsc::Sender<StreamUpdate>,
    metrics: EngineMetrics,
) {
    let mut tracker = StreamTracker::new(screen, config.tracker.clone(), &config.velocity);
    let predictor = config
        .handoff
        .enabled
        .then(|| HandoffPredictor::new(topology, config.handoff.clone()));
    // Tracks that carried a prediction last cycle, to report clears.
    let mut had_prediction: HashSet<TrackId> = HashSet::new();

    while let Some(frame) = frames.recv().await {
        let outcome = tracker.observe(&frame.detections, frame.timestamp_ms);
        metrics.inc(&metrics.frames_processed);
        metrics.add(&metrics.detections_dropped, outcome.dropped as u64);
        metrics.add(&metrics.tracks_spawned, outcome.spawned.len() as u64);
        metrics.add(&metrics.tracks_evicted, outcome.evicted.len() as u64);

        let mut predictions = Vec::new();
        let mut predicted: HashSet<TrackId> = HashSet::new();
        if let Some(predictor) = &predictor {
            for track in tracker.tracks() {
                // Coasting tracks keep whatever prediction they last made;
                // re-predicting from an extrapolated position would tear
                // down a handoff the moment the object left the frame.
                if track.age_since_update != 0 {
                    continue;
                }
                if let Some(prediction) = predictor.predict(track, frame.timestamp_ms) {
                    predicted.insert(track.id);
                    predictions.push(prediction);
                }
            }
        }
        metrics.add(&metrics.predictions_emitted, predictions.len() as u64);

        // A clear is only meaningful for a track we still see: it predicted
        // last cycle, was matched this cycle, and predicts nothing now.
        let cleared_predictions: Vec<TrackId> = had_prediction
            .iter()
            .copied()
            .filter(|&id| {
                tracker
                    .get_track(id)
                    .map_or(false, |t| t.age_since_update == 0 && !predicted.contains(&id))
            })
            .collect();
        for id in &cleared_predictions {
            had_prediction.remove(id);
        }
        for id in &outcome.evicted {
            had_prediction.remove(id);
        }
        had_prediction.extend(predicted);

        let tracks: Vec<TrackObservation> = tracker
            .tracks()
            .iter()
            .map(|t| {
                let velocity = t.velocity();
                TrackObservation {
                    track_id: t.id,
                    bbox: t.bbox,
                    class: t.class.clone(),
                    confidence: t.confidence,
                    velocity: (velocity.vx, velocity.vy),
                    age_since_update: t.age_since_update,
                    last_seen_ms: t.last_seen_ms,
                }
            })
            .collect();

        let update = StreamUpdate {
            stream_id: screen,
            timestamp_ms: frame.timestamp_ms,
            tracks,
            spawned: outcome.spawned,
            evicted: outcome.evicted,
            predictions,
            cleared_predictions,
        };
        if updates.send(update).await.is_err() {
            break; // registry gone, nothing left to feed
        }
    }
    debug!(stream = screen, "stream worker shutting down");
}

/// Single owner of cross-screen state. Applies updates as they arrive and
/// publishes a snapshot on every tick; both run on this task, so a snapshot
/// can never observe a half-applied update.
async fn registry_task(
    config: Config,
    mut updates: mpsc::Receiver<StreamUpdate>,
    snapshots: watch::Sender<Arc<Snapshot>>,
    metrics: EngineMetrics,
) {
    let mut registry = CrossScreenRegistry::new(&config.handoff);
    let mut aggregator = SnapshotAggregator::new();
    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.snapshot.interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut confirmed_seen = 0u64;
    let mut expired_seen = 0u64;

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                registry.apply(update);
                metrics.add(
                    &metrics.handoffs_confirmed,
                    registry.confirmed_total() - confirmed_seen,
                );
                metrics.add(
                    &metrics.predictions_expired,
                    registry.expired_total() - expired_seen,
                );
                confirmed_seen = registry.confirmed_total();
                expired_seen = registry.expired_total();
            }
            _ = ticker.tick() => {
                let now_ms = started.elapsed().as_secs_f64() * 1000.0;
                let snapshot = aggregator.assemble(&registry, now_ms);
                metrics.inc(&metrics.snapshots_published);
                if snapshots.send(Arc::new(snapshot)).is_err() {
                    break; // every subscriber hung up
                }
            }
        }
    }

    // Final consistent view for anyone still watching.
    let now_ms = started.elapsed().as_secs_f64() * 1000.0;
    let snapshot = aggregator.assemble(&registry, now_ms);
    metrics.inc(&metrics.snapshots_published);
    let _ = snapshots.send(Arc::new(snapshot));
    info!("registry task shutting down");
}
