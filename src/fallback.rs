// src/fallback.rs
//
// Last-resort occupancy estimator for when the detector is unavailable,
// failing or shed under resource pressure. Cheap image statistics blended
// with the recent count history; deterministic, so a stuck detector produces
// a stable (if coarse) series instead of noise.

use crate::risk::HOURLY_MULTIPLIER;
use crate::types::{Frame, RegionOfInterest, TimeContext};
use tracing::debug;

/// Sample every Nth pixel in each direction; full-resolution scans are not
/// worth it for a heuristic.
const SAMPLE_STRIDE: usize = 4;

/// Luminance gradient above this counts as an edge.
const EDGE_THRESHOLD: f32 = 30.0;

/// How much of the estimate comes from history when history exists.
const HISTORY_WEIGHT: f32 = 0.6;

#[derive(Debug, Clone, Copy)]
pub struct FallbackEstimate {
    pub count: usize,
    pub confidence: f32,
}

pub struct FallbackEstimator;

impl FallbackEstimator {
    /// Estimate occupancy from image texture plus the recent count history.
    ///
    /// A zero-sized frame falls through to history alone; with neither, the
    /// estimate is zero. Never fails.
    pub fn estimate(
        frame: &Frame,
        roi: &RegionOfInterest,
        recent_counts: &[usize],
        time: &TimeContext,
    ) -> FallbackEstimate {
        let image_estimate = image_estimate(frame, roi, time);
        let history_avg = if recent_counts.is_empty() {
            None
        } else {
            Some(recent_counts.iter().sum::<usize>() as f32 / recent_counts.len() as f32)
        };

        let (blended, confidence) = match (history_avg, image_estimate) {
            (Some(hist), Some(img)) => {
                (HISTORY_WEIGHT * hist + (1.0 - HISTORY_WEIGHT) * img, 0.35)
            }
            (Some(hist), None) => (hist, 0.35),
            (None, Some(img)) => (img, 0.25),
            (None, None) => (0.0, 0.25),
        };

        let count = blended.round().max(0.0) as usize;
        debug!(
            "Fallback estimate: {} (history {:?}, image {:?})",
            count, history_avg, image_estimate
        );

        FallbackEstimate { count, confidence }
    }
}

/// Texture-based occupancy proxy: edge density plus a skin-tone ratio over a
/// strided sample of the ROI, scaled by ROI area and the hourly profile.
/// `None` when the frame has no pixels to sample.
fn image_estimate(frame: &Frame, roi: &RegionOfInterest, time: &TimeContext) -> Option<f32> {
    if frame.width < 2 || frame.height < 2 {
        return None;
    }

    let roi = roi.clamped();
    let x0 = (roi.x1 * frame.width as f32) as usize;
    let y0 = (roi.y1 * frame.height as f32) as usize;
    let x1 = ((roi.x2 * frame.width as f32) as usize).min(frame.width - 1);
    let y1 = ((roi.y2 * frame.height as f32) as usize).min(frame.height - 1);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let mut samples = 0u32;
    let mut edges = 0u32;
    let mut skin = 0u32;

    for y in (y0..y1).step_by(SAMPLE_STRIDE) {
        for x in (x0..x1).step_by(SAMPLE_STRIDE) {
            let [r, g, b] = frame.pixel(x, y);
            samples += 1;

            let lum = luminance(r, g, b);
            let dx = luminance_at(frame, x + 1, y) - lum;
            let dy = luminance_at(frame, x, y + 1) - lum;
            if dx.abs() + dy.abs() > EDGE_THRESHOLD {
                edges += 1;
            }

            if is_skin_tone(r, g, b) {
                skin += 1;
            }
        }
    }

    if samples == 0 {
        return None;
    }

    let edge_ratio = edges as f32 / samples as f32;
    let skin_ratio = skin as f32 / samples as f32;
    let roi_area = (roi.x2 - roi.x1) * (roi.y2 - roi.y1);

    // Edge clutter says "stuff in frame", skin says "people in frame"; skin
    // weighs heavier. The hourly profile nudges toward the expected load.
    let base = (edge_ratio * 40.0 + skin_ratio * 120.0) * roi_area;
    let hourly = (HOURLY_MULTIPLIER[time.hour as usize % 24] / 1.4).clamp(0.5, 2.0);

    Some(base * hourly)
}

fn luminance(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn luminance_at(frame: &Frame, x: usize, y: usize) -> f32 {
    let x = x.min(frame.width - 1);
    let y = y.min(frame.height - 1);
    let [r, g, b] = frame.pixel(x, y);
    luminance(r, g, b)
}

/// Classic RGB skin heuristic. Rough, biased toward lighter tones, but only
/// one vote among several in an already coarse estimate.
fn is_skin_tone(r: u8, g: u8, b: u8) -> bool {
    r > 95 && g > 40 && b > 20 && r > g && r > b && r.saturating_sub(g) > 15
}
