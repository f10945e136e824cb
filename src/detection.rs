// src/detection.rs
//
// Decodes raw detector output into person boxes and suppresses redundant
// overlaps. Everything downstream of the decoder works in normalized [0,1]
// ROI-relative coordinates; tensor pixels never leak past this module.

use crate::config::DetectionConfig;
use crate::error::PipelineError;
use crate::inference::RawOutput;
use crate::types::Detection;
use tracing::debug;

/// Decode `[1, 4+C, A]` center-form output into corner-form person boxes.
///
/// Per anchor: geometry is (cx, cy, w, h) in tensor pixels followed by one
/// confidence per class. Anchors below the confidence floor, with
/// non-finite geometry, inverted corners or sub-minimum size are dropped.
pub fn decode_person_boxes(
    raw: &RawOutput,
    cfg: &DetectionConfig,
) -> Result<Vec<Detection>, PipelineError> {
    if raw.shape.len() != 3 || raw.shape[0] != 1 {
        return Err(PipelineError::MalformedOutput(format!(
            "expected shape [1, 4+C, A], got {:?}",
            raw.shape
        )));
    }
    let num_attrs = raw.shape[1];
    let num_anchors = raw.shape[2];
    if num_attrs != 4 + cfg.num_classes {
        return Err(PipelineError::MalformedOutput(format!(
            "expected {} attributes per anchor, got {}",
            4 + cfg.num_classes,
            num_attrs
        )));
    }
    if raw.data.len() != raw.element_count() {
        return Err(PipelineError::MalformedOutput(format!(
            "data length {} does not match shape {:?}",
            raw.data.len(),
            raw.shape
        )));
    }
    if cfg.person_class >= cfg.num_classes {
        return Err(PipelineError::MalformedOutput(format!(
            "person class {} outside {} classes",
            cfg.person_class, cfg.num_classes
        )));
    }

    let s = cfg.input_size as f32;
    let person_row = (4 + cfg.person_class) * num_anchors;
    let mut detections = Vec::new();

    for i in 0..num_anchors {
        let confidence = raw.data[person_row + i];
        if !confidence.is_finite() || confidence < cfg.confidence_threshold {
            continue;
        }

        let cx = raw.data[i];
        let cy = raw.data[num_anchors + i];
        let w = raw.data[2 * num_anchors + i];
        let h = raw.data[3 * num_anchors + i];

        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
            continue;
        }

        // Center form to corner form, normalized by the tensor size.
        let x1 = ((cx - w / 2.0) / s).clamp(0.0, 1.0);
        let y1 = ((cy - h / 2.0) / s).clamp(0.0, 1.0);
        let x2 = ((cx + w / 2.0) / s).clamp(0.0, 1.0);
        let y2 = ((cy + h / 2.0) / s).clamp(0.0, 1.0);

        if x2 - x1 < cfg.min_box_size || y2 - y1 < cfg.min_box_size {
            continue;
        }

        detections.push(Detection {
            bbox: [x1, y1, x2, y2],
            confidence,
            class_id: cfg.person_class,
        });
    }

    debug!(
        "Decoded {} person candidates from {} anchors",
        detections.len(),
        num_anchors
    );
    Ok(detections)
}

/// Greedy non-maximum suppression with a kept-count cap.
///
/// Candidates are visited in confidence order (ties broken by original
/// index); each kept box suppresses all remaining boxes overlapping it past
/// the IoU threshold. No two kept boxes exceed the threshold and the output
/// never exceeds `max_detections`.
pub fn nms(detections: &[Detection], iou_threshold: f32, max_detections: usize) -> Vec<Detection> {
    if detections.is_empty() {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        detections[b]
            .confidence
            .partial_cmp(&detections[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut suppressed = vec![false; detections.len()];
    let mut kept = Vec::new();

    for (pos, &idx) in order.iter().enumerate() {
        if suppressed[idx] {
            continue;
        }
        kept.push(detections[idx].clone());
        if kept.len() >= max_detections {
            break;
        }
        for &other in &order[pos + 1..] {
            if suppressed[other] {
                continue;
            }
            if iou(&detections[idx].bbox, &detections[other].bbox) > iou_threshold {
                suppressed[other] = true;
            }
        }
    }

    kept
}

/// Standard intersection-over-union of axis-aligned boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
