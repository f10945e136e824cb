// src/types.rs

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One frame borrowed from the camera collaborator for the duration of a
/// single `analyze` call. Pixels are interleaved RGB.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

impl Frame {
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * self.width + x) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }
}

/// Normalized sub-rectangle of the frame to run detection on.
/// Coordinates are relative to the full frame, `0 <= x1 < x2 <= 1`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RegionOfInterest {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Clamp into [0,1] keeping a non-empty span. Out-of-range ROIs are
    /// tolerated rather than rejected.
    pub fn clamped(&self) -> Self {
        let x1 = self.x1.clamp(0.0, 1.0);
        let y1 = self.y1.clamp(0.0, 1.0);
        let x2 = self.x2.clamp(0.0, 1.0).max(x1);
        let y2 = self.y2.clamp(0.0, 1.0).max(y1);
        Self { x1, y1, x2, y2 }
    }
}

/// One candidate person box in normalized [0,1] coordinates relative to the
/// ROI. Never expressed in display or tensor pixels past the decoder.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// [x1, y1, x2, y2], `x2 > x1`, `y2 > y1`
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        )
    }

    pub fn width(&self) -> f32 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> f32 {
        self.bbox[3] - self.bbox[1]
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }
}

/// Best-effort identity derived from a spatial hash of the box center.
/// Not biometric re-identification: identities survive small per-frame
/// displacement but not occlusion or fast motion.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedPerson {
    pub id: u64,
    pub center: (f32, f32),
    pub confidence: f32,
    /// Normalized units per second; `None` when no previous-frame match.
    pub velocity: Option<(f32, f32)>,
}

/// One entry in a per-identity trail.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrailPoint {
    pub position: (f32, f32),
    pub confidence: f32,
    pub timestamp_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    Clustering,
    Flowing,
    Queuing,
    Gathering,
    Dispersing,
}

impl BehaviorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clustering => "clustering",
            Self::Flowing => "flowing",
            Self::Queuing => "queuing",
            Self::Gathering => "gathering",
            Self::Dispersing => "dispersing",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BehaviorPattern {
    pub kind: BehaviorKind,
    pub confidence: f32,
    pub people_involved: usize,
    /// Pattern centroid in normalized ROI coordinates.
    pub location: (f32, f32),
    pub intensity: f32,
    /// How long this pattern kind has persisted across recent frames.
    pub duration_ms: f64,
}

/// Whole-frame movement summary.
#[derive(Debug, Clone, Serialize)]
pub struct FlowDirection {
    /// Radians from `atan2(dy, dx)`, range (-pi, pi].
    pub angle: f32,
    /// Mean displacement magnitude in normalized units per second.
    pub velocity_magnitude: f32,
    /// 1.0 when every displacement vector is identical, 0.0 under high
    /// variance.
    pub consistency: f32,
    pub ritual_flow: bool,
    pub bottleneck: bool,
}

impl FlowDirection {
    pub fn still() -> Self {
        Self {
            angle: 0.0,
            velocity_magnitude: 0.0,
            consistency: 1.0,
            ritual_flow: false,
            bottleneck: false,
        }
    }
}

/// Fixed-grid occupancy summary of one frame.
#[derive(Debug, Clone, Serialize)]
pub struct SpatialStats {
    /// Detections per grid cell.
    pub density: f32,
    /// Inverse coefficient of variation across cells; 1.0 when perfectly
    /// even.
    pub uniformity: f32,
    /// Average neighbor-similarity across occupied cells.
    pub clustering: f32,
    pub hotspots: Vec<Hotspot>,
}

impl SpatialStats {
    pub fn empty() -> Self {
        Self {
            density: 0.0,
            uniformity: 1.0,
            clustering: 0.0,
            hotspots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Hotspot {
    pub cell: (usize, usize),
    pub count: usize,
    /// Cell center in normalized coordinates.
    pub center: (f32, f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    /// Raw accumulated score before level mapping, clamped to [0,1].
    pub score: f32,
    /// `(1 - score) * 100`, range [0,100].
    pub safety_score: f32,
    /// `clamp(score, 0, 1)`.
    pub evacuation_urgency: f32,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    /// Forecast occupancy keyed by horizon in minutes (1, 5, 15, 30).
    pub horizon_counts: BTreeMap<u32, usize>,
    pub trend: TrendDirection,
    pub confidence: f32,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrowdDensity {
    Low,
    Moderate,
    High,
    Critical,
}

impl CrowdDensity {
    pub fn classify(count: usize) -> Self {
        match count {
            0..=9 => Self::Low,
            10..=24 => Self::Moderate,
            25..=49 => Self::High,
            _ => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Wall-clock context for the risk and prediction multipliers. Computed once
/// per `analyze` call; injectable for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct TimeContext {
    pub hour: u32,
    pub is_peak_hour: bool,
    pub is_auspicious: bool,
}

impl TimeContext {
    pub fn now() -> Self {
        Self::at_hour(chrono::Local::now().hour())
    }

    pub fn at_hour(hour: u32) -> Self {
        let hour = hour % 24;
        Self {
            hour,
            // Morning and evening visiting peaks.
            is_peak_hour: matches!(hour, 6..=9 | 17..=20),
            // Dawn and dusk ritual windows draw directed processions.
            is_auspicious: matches!(hour, 5..=6 | 18..=19),
        }
    }
}

/// Aggregate per-frame analysis delivered to the persistence collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct FrameResult {
    pub count: usize,
    /// Mean detection confidence; reduced in degraded mode.
    pub confidence: f32,
    pub boxes: Vec<Detection>,
    pub person_ids: Vec<u64>,
    pub tracking: Vec<TrackedPerson>,
    pub behavior_patterns: Vec<BehaviorPattern>,
    pub flow: FlowDirection,
    pub spatial: SpatialStats,
    pub risk: RiskAssessment,
    pub predictions: PredictionResult,
    pub crowd_density: CrowdDensity,
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
    /// Source frame timestamp, used for velocity deltas between frames.
    pub frame_timestamp_ms: f64,
    pub processing_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_clamping() {
        let roi = RegionOfInterest::new(-0.2, 0.1, 1.4, 0.9).clamped();
        assert_eq!(roi.x1, 0.0);
        assert_eq!(roi.x2, 1.0);
        assert_eq!(roi.y1, 0.1);
        assert_eq!(roi.y2, 0.9);
    }

    #[test]
    fn test_density_classification_boundaries() {
        assert_eq!(CrowdDensity::classify(0), CrowdDensity::Low);
        assert_eq!(CrowdDensity::classify(9), CrowdDensity::Low);
        assert_eq!(CrowdDensity::classify(10), CrowdDensity::Moderate);
        assert_eq!(CrowdDensity::classify(25), CrowdDensity::High);
        assert_eq!(CrowdDensity::classify(50), CrowdDensity::Critical);
    }

    #[test]
    fn test_time_context_peak_hours() {
        assert!(TimeContext::at_hour(8).is_peak_hour);
        assert!(TimeContext::at_hour(18).is_peak_hour);
        assert!(!TimeContext::at_hour(3).is_peak_hour);
        assert!(TimeContext::at_hour(5).is_auspicious);
        assert!(!TimeContext::at_hour(12).is_auspicious);
    }

    #[test]
    fn test_detection_center() {
        let det = Detection {
            bbox: [0.2, 0.4, 0.4, 0.8],
            confidence: 0.9,
            class_id: 0,
        };
        let (cx, cy) = det.center();
        assert!((cx - 0.3).abs() < 1e-6);
        assert!((cy - 0.6).abs() < 1e-6);
    }
}
