// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    pub behavior: BehaviorConfig,
    pub history: HistoryConfig,
    pub schedule: ScheduleConfig,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config {}", path.as_ref().display()))?;
        let config: PipelineConfig =
            serde_yaml::from_str(&contents).context("parsing pipeline config")?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Per-anchor person confidence floor.
    pub confidence_threshold: f32,
    /// NMS suppression threshold.
    pub iou_threshold: f32,
    /// Hard cap on kept boxes per frame.
    pub max_detections: usize,
    /// Square model input size S (tensor is S x S x 3).
    pub input_size: usize,
    /// Class count in the raw output (4 + num_classes attributes per anchor).
    pub num_classes: usize,
    /// Class index decoded as "person" (COCO: 0).
    pub person_class: usize,
    /// Minimum normalized box width/height kept by the decoder.
    pub min_box_size: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.4,
            max_detections: 300,
            input_size: 640,
            num_classes: 80,
            person_class: 0,
            min_box_size: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Quantization cell for the identity spatial hash, normalized units.
    pub cell_size: f32,
    /// Nearest-match adoption radius against the previous frame.
    pub match_radius: f32,
    /// Maximum points kept per trail.
    pub trail_max_len: usize,
    /// Trail fade window in milliseconds.
    pub trail_max_age_ms: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            cell_size: 0.05,
            match_radius: 0.1,
            trail_max_len: 10,
            trail_max_age_ms: 5_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Centers closer than this belong to the same group.
    pub proximity_threshold: f32,
    /// Group size required before a line scan is attempted.
    pub queue_min_people: usize,
    /// Perpendicular distance tolerance for the queue line scan.
    pub queue_line_tolerance: f32,
    /// Nearest-match radius for frame-to-frame displacement.
    pub flow_match_radius: f32,
    /// Mean per-frame displacement needed for a flowing pattern.
    pub flow_min_displacement: f32,
    /// Density grid is grid_size x grid_size cells.
    pub grid_size: usize,
    /// Cells above this fraction of the max cell occupancy are hotspots.
    pub hotspot_ratio: f32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            proximity_threshold: 0.1,
            queue_min_people: 5,
            queue_line_tolerance: 0.05,
            flow_match_radius: 0.2,
            flow_min_displacement: 0.01,
            grid_size: 10,
            hotspot_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum retained FrameResults.
    pub max_len: usize,
    /// Entries older than this are pruned on cleanup.
    pub max_age_ms: f64,
    /// How often the governor runs the age-based prune.
    pub cleanup_interval_ms: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_len: 20,
            max_age_ms: 30.0 * 60.0 * 1000.0,
            cleanup_interval_ms: 3.0 * 60.0 * 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Target interval between analyze ticks.
    pub detection_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            detection_interval_ms: 500,
        }
    }
}
