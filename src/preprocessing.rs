// src/preprocessing.rs

use crate::error::PipelineError;
use crate::types::{Frame, RegionOfInterest};

/// Crop the ROI out of the frame and resample it into a square S x S x 3
/// planar tensor, channel-major, values scaled to [0,1].
///
/// The ROI rectangle is stretched directly onto the canvas (no letterboxing),
/// so downstream boxes normalized by S map straight back onto the ROI.
/// Out-of-range ROIs are clamped to the frame; only a zero-sized source is
/// rejected.
pub fn preprocess_roi(
    frame: &Frame,
    roi: &RegionOfInterest,
    input_size: usize,
) -> Result<Vec<f32>, PipelineError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(PipelineError::InvalidFrame {
            width: frame.width,
            height: frame.height,
        });
    }

    let roi = roi.clamped();
    let fw = frame.width as f32;
    let fh = frame.height as f32;

    // ROI pixel rectangle, at least one pixel in each dimension.
    let rx = (roi.x1 * fw).floor().clamp(0.0, fw - 1.0);
    let ry = (roi.y1 * fh).floor().clamp(0.0, fh - 1.0);
    let rw = ((roi.x2 - roi.x1) * fw).ceil().max(1.0);
    let rh = ((roi.y2 - roi.y1) * fh).ceil().max(1.0);

    let s = input_size;
    let x_ratio = rw / s as f32;
    let y_ratio = rh / s as f32;

    let mut tensor = vec![0.0f32; 3 * s * s];
    let plane = s * s;

    for dy in 0..s {
        for dx in 0..s {
            let sx = rx + dx as f32 * x_ratio;
            let sy = ry + dy as f32 * y_ratio;

            let sx0 = (sx.floor() as usize).min(frame.width - 1);
            let sy0 = (sy.floor() as usize).min(frame.height - 1);
            let sx1 = (sx0 + 1).min(frame.width - 1);
            let sy1 = (sy0 + 1).min(frame.height - 1);

            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = frame.data[(sy0 * frame.width + sx0) * 3 + c] as f32;
                let p10 = frame.data[(sy0 * frame.width + sx1) * 3 + c] as f32;
                let p01 = frame.data[(sy1 * frame.width + sx0) * 3 + c] as f32;
                let p11 = frame.data[(sy1 * frame.width + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                tensor[c * plane + dy * s + dx] = val / 255.0;
            }
        }
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: usize, height: usize, fill: u8) -> Frame {
        Frame {
            data: vec![fill; width * height * 3],
            width,
            height,
            timestamp_ms: 0.0,
        }
    }

    #[test]
    fn test_tensor_shape_and_range() {
        let f = frame(320, 240, 128);
        let t = preprocess_roi(&f, &RegionOfInterest::full(), 64).unwrap();
        assert_eq!(t.len(), 3 * 64 * 64);
        assert!(t.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_constant_frame_gives_constant_tensor() {
        let f = frame(100, 100, 255);
        let t = preprocess_roi(&f, &RegionOfInterest::new(0.1, 0.1, 0.9, 0.9), 32).unwrap();
        assert!(t.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_zero_size_frame_rejected() {
        let f = frame(0, 240, 0);
        let err = preprocess_roi(&f, &RegionOfInterest::full(), 64).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFrame { width: 0, .. }));
    }

    #[test]
    fn test_out_of_range_roi_is_clamped() {
        let f = frame(64, 64, 10);
        let roi = RegionOfInterest::new(-0.5, -0.5, 1.5, 1.5);
        let t = preprocess_roi(&f, &roi, 16).unwrap();
        assert_eq!(t.len(), 3 * 16 * 16);
        assert!(t.iter().all(|&v| (v - 10.0 / 255.0).abs() < 1e-6));
    }

    #[test]
    fn test_tiny_roi_still_samples() {
        let f = frame(640, 480, 77);
        let roi = RegionOfInterest::new(0.5, 0.5, 0.5005, 0.5005);
        let t = preprocess_roi(&f, &roi, 8).unwrap();
        assert_eq!(t.len(), 3 * 8 * 8);
    }
}
