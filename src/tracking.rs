// src/tracking.rs
//
// Identity assignment across frames without detector-provided IDs.
//
// An identity is a deterministic spatial hash of the box center quantized to
// a coarse cell, so a person holding position keeps the same ID frame after
// frame. When movement crosses a cell boundary the hash changes; a
// nearest-match search against the previous frame re-adopts the old ID when
// the displacement is within a small radius. This is spatial continuity, not
// re-identification: occlusion or fast motion breaks the chain, and two
// people sharing a cell can collide. Documented limitation, not a bug.

use crate::config::TrackingConfig;
use crate::types::{Detection, TrackedPerson, TrailPoint};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

pub struct IdentityTracker {
    config: TrackingConfig,
    trails: HashMap<u64, VecDeque<TrailPoint>>,
}

fn spatial_hash(qx: u64, qy: u64) -> u64 {
    // Classic two-prime spatial hash; wrapping keeps it total.
    qx.wrapping_mul(73_856_093) ^ qy.wrapping_mul(19_349_663)
}

impl IdentityTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            trails: HashMap::new(),
        }
    }

    /// Assign identities and velocities to the current frame's detections.
    ///
    /// `previous` is the most recent frame's tracked set (from history) and
    /// `prev_timestamp_ms` its frame time; velocity is position delta over
    /// that interval, `None` when there is no match.
    pub fn update(
        &mut self,
        detections: &[Detection],
        previous: &[TrackedPerson],
        timestamp_ms: f64,
        prev_timestamp_ms: Option<f64>,
    ) -> Vec<TrackedPerson> {
        let dt_secs = prev_timestamp_ms
            .map(|prev| (timestamp_ms - prev) / 1000.0)
            .filter(|&dt| dt > 1e-3);

        let mut tracked = Vec::with_capacity(detections.len());

        for det in detections {
            let (cx, cy) = det.center();
            let cell = self.config.cell_size.max(1e-4);
            let mut id = spatial_hash((cx / cell).floor() as u64, (cy / cell).floor() as u64);

            let mut velocity = None;
            if let Some(prev) = previous.iter().find(|p| p.id == id) {
                velocity = dt_secs.map(|dt| {
                    let dt = dt as f32;
                    ((cx - prev.center.0) / dt, (cy - prev.center.1) / dt)
                });
            } else if let Some(prev) = nearest_within(previous, cx, cy, self.config.match_radius) {
                // Crossed a hash cell boundary; keep the old identity.
                id = prev.id;
                velocity = dt_secs.map(|dt| {
                    let dt = dt as f32;
                    ((cx - prev.center.0) / dt, (cy - prev.center.1) / dt)
                });
            }

            self.push_trail(id, (cx, cy), det.confidence, timestamp_ms);

            tracked.push(TrackedPerson {
                id,
                center: (cx, cy),
                confidence: det.confidence,
                velocity,
            });
        }

        self.evict_stale(timestamp_ms);
        debug!(
            "Tracked {} person(s), {} active trail(s)",
            tracked.len(),
            self.trails.len()
        );
        tracked
    }

    fn push_trail(&mut self, id: u64, position: (f32, f32), confidence: f32, timestamp_ms: f64) {
        let trail = self
            .trails
            .entry(id)
            .or_insert_with(|| VecDeque::with_capacity(self.config.trail_max_len + 1));
        trail.push_back(TrailPoint {
            position,
            confidence,
            timestamp_ms,
        });
        while trail.len() > self.config.trail_max_len {
            trail.pop_front();
        }
    }

    /// Drop trail entries past the fade window and trails with nothing left.
    fn evict_stale(&mut self, now_ms: f64) {
        let max_age = self.config.trail_max_age_ms;
        for trail in self.trails.values_mut() {
            while trail
                .front()
                .is_some_and(|p| now_ms - p.timestamp_ms > max_age)
            {
                trail.pop_front();
            }
        }
        self.trails.retain(|_, trail| !trail.is_empty());
    }

    pub fn trail(&self, id: u64) -> Option<&VecDeque<TrailPoint>> {
        self.trails.get(&id)
    }

    pub fn active_trail_count(&self) -> usize {
        self.trails.len()
    }

    pub fn reset(&mut self) {
        self.trails.clear();
    }
}

fn nearest_within<'a>(
    previous: &'a [TrackedPerson],
    cx: f32,
    cy: f32,
    radius: f32,
) -> Option<&'a TrackedPerson> {
    let radius_sq = radius * radius;
    previous
        .iter()
        .map(|p| {
            let d = (p.center.0 - cx).powi(2) + (p.center.1 - cy).powi(2);
            (p, d)
        })
        .filter(|&(_, d)| d <= radius_sq)
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(p, _)| p)
}
