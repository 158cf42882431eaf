//! Pre- and post-processing for YOLO style detection heads.
//!
//! The network sees a square, letterboxed RGB image and returns a
//! `[1, 4 + num_classes, num_candidates]` tensor whose first four rows are
//! `cx, cy, w, h` in letterbox pixels and whose remaining rows are per-class
//! scores.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{Array4, ArrayView2, ArrayViewD, Axis, Ix2};

use super::{DetectorParams, InferenceError, RawDetection};

const PAD_VALUE: u8 = 114;

/// How a source image was placed on the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_width = (width as f32 * scale).round();
        let new_height = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size as f32 - new_width) / 2.0 - 0.1).round(),
            pad_y: ((size as f32 - new_height) / 2.0 - 0.1).round(),
            width,
            height,
        }
    }

    /// Maps a letterbox-space box back onto the source image, clipped to its bounds.
    pub fn to_source(&self, [x1, y1, x2, y2]: [f32; 4]) -> [f32; 4] {
        let w = self.width as f32;
        let h = self.height as f32;
        [
            ((x1 - self.pad_x) / self.scale).clamp(0.0, w),
            ((y1 - self.pad_y) / self.scale).clamp(0.0, h),
            ((x2 - self.pad_x) / self.scale).clamp(0.0, w),
            ((y2 - self.pad_y) / self.scale).clamp(0.0, h),
        ]
    }
}

pub struct Letterbox {
    /// NCHW, RGB, scaled to `[0, 1]`.
    pub input: Array4<f32>,
    pub geometry: Geometry,
}

pub fn letterbox(image: &DynamicImage, size: u32) -> Result<Letterbox, InferenceError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(InferenceError::Preprocessing(format!(
            "image has no pixels ({}x{})",
            width, height
        )));
    }
    if size == 0 {
        return Err(InferenceError::Preprocessing(
            "model input size must be positive".to_string(),
        ));
    }

    let geometry = Geometry::new(width, height, size);
    let new_width = ((width as f32 * geometry.scale).round() as u32).max(1);
    let new_height = ((height as f32 * geometry.scale).round() as u32).max(1);

    let resized = imageops::resize(&image.to_rgb8(), new_width, new_height, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    imageops::overlay(
        &mut canvas,
        &resized,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );

    let side = size as usize;
    let input = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    Ok(Letterbox { input, geometry })
}

/// Turns a raw head output into detections on the source image, highest
/// confidence first.
pub fn decode(
    output: ArrayViewD<'_, f32>,
    geometry: &Geometry,
    params: &DetectorParams,
) -> Result<Vec<RawDetection>, InferenceError> {
    let output = predictions(output)?;
    let num_classes = output.nrows() - 4;

    let mut candidates = Vec::new();
    for column in output.columns() {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class_id in 0..num_classes {
            let score = column[4 + class_id];
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }
        if best_score <= params.conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
        candidates.push(RawDetection {
            class_id: best_class,
            confidence: best_score,
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
        });
    }

    let mut kept = nms(candidates, params.iou_threshold);
    kept.truncate(params.max_detections);
    for detection in &mut kept {
        detection.bbox = geometry.to_source(detection.bbox);
    }
    Ok(kept)
}

fn predictions(output: ArrayViewD<'_, f32>) -> Result<ArrayView2<'_, f32>, InferenceError> {
    let shape = output.shape().to_vec();
    let output = match shape.as_slice() {
        [1, _, _] => output.index_axis_move(Axis(0), 0),
        [_, _] => output,
        _ => {
            return Err(InferenceError::Output(format!(
                "expected [1, 4 + classes, candidates], got {:?}",
                shape
            )));
        }
    };
    let output = output
        .into_dimensionality::<Ix2>()
        .map_err(|e| InferenceError::Output(e.to_string()))?;
    if output.nrows() < 5 {
        return Err(InferenceError::Output(format!(
            "expected at least 5 rows (box + one class), got {}",
            output.nrows()
        )));
    }
    Ok(output)
}

/// Class-aware non-maximum suppression. Survivors come back sorted by
/// descending confidence.
pub fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = iw * ih;
    let union = area(a) + area(b) - intersection;
    if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn params() -> DetectorParams {
        DetectorParams::default()
    }

    fn identity() -> Geometry {
        Geometry {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            width: 640,
            height: 640,
        }
    }

    // Columns are candidates: cx, cy, w, h, then one score per class.
    fn head(candidates: &[[f32; 6]]) -> Array3<f32> {
        let mut out = Array3::zeros((1, 6, candidates.len()));
        for (i, c) in candidates.iter().enumerate() {
            for (row, value) in c.iter().enumerate() {
                out[[0, row, i]] = *value;
            }
        }
        out
    }

    #[test]
    fn geometry_for_landscape_image() {
        let g = Geometry::new(1280, 720, 640);
        assert_eq!(g.scale, 0.5);
        assert_eq!(g.pad_x, 0.0);
        assert_eq!(g.pad_y, 140.0);
        assert_eq!(g.to_source([10.0, 150.0, 20.0, 160.0]), [20.0, 20.0, 40.0, 40.0]);
    }

    #[test]
    fn to_source_clips_to_image() {
        let g = Geometry::new(320, 320, 640);
        assert_eq!(g.to_source([-10.0, -4.0, 700.0, 650.0]), [0.0, 0.0, 320.0, 320.0]);
    }

    #[test]
    fn letterbox_pads_with_gray() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([255, 0, 0])));
        let lb = letterbox(&image, 64).unwrap();
        assert_eq!(lb.input.shape(), &[1, 3, 64, 64]);
        assert_eq!(lb.geometry.pad_y, 16.0);
        let gray = PAD_VALUE as f32 / 255.0;
        assert_eq!(lb.input[[0, 0, 0, 0]], gray);
        assert_eq!(lb.input[[0, 0, 32, 32]], 1.0);
        assert_eq!(lb.input[[0, 1, 32, 32]], 0.0);
    }

    #[test]
    fn letterbox_rejects_empty_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            letterbox(&image, 640),
            Err(InferenceError::Preprocessing(_))
        ));
    }

    #[test]
    fn decode_filters_by_confidence_and_picks_best_class() {
        let out = head(&[
            [100.0, 100.0, 20.0, 40.0, 0.1, 0.9],
            [300.0, 300.0, 10.0, 10.0, 0.2, 0.1],
        ]);
        let detections = decode(out.view().into_dyn(), &identity(), &params()).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[0].bbox, [90.0, 80.0, 110.0, 120.0]);
    }

    #[test]
    fn decode_accepts_unbatched_output() {
        let out = Array2::from_shape_vec((5, 1), vec![50.0, 50.0, 10.0, 10.0, 0.8]).unwrap();
        let detections = decode(out.view().into_dyn(), &identity(), &params()).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 0);
    }

    #[test]
    fn decode_rejects_bad_shapes() {
        let out = Array2::<f32>::zeros((4, 10));
        assert!(matches!(
            decode(out.view().into_dyn(), &identity(), &params()),
            Err(InferenceError::Output(_))
        ));
        let out = ndarray::Array4::<f32>::zeros((1, 1, 6, 10));
        assert!(decode(out.view().into_dyn(), &identity(), &params()).is_err());
    }

    #[test]
    fn decode_orders_by_confidence_and_caps() {
        let out = head(&[
            [10.0, 10.0, 4.0, 4.0, 0.5, 0.0],
            [100.0, 100.0, 4.0, 4.0, 0.95, 0.0],
            [200.0, 200.0, 4.0, 4.0, 0.7, 0.0],
        ]);
        let p = DetectorParams {
            max_detections: 2,
            ..params()
        };
        let detections = decode(out.view().into_dyn(), &identity(), &p).unwrap();
        let confidences: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.95, 0.7]);
    }

    #[test]
    fn nms_is_class_aware() {
        let a = RawDetection {
            class_id: 0,
            confidence: 0.9,
            bbox: [0.0, 0.0, 10.0, 10.0],
        };
        let overlapping = RawDetection {
            confidence: 0.8,
            bbox: [1.0, 1.0, 10.0, 10.0],
            ..a.clone()
        };
        let other_class = RawDetection {
            class_id: 1,
            ..overlapping.clone()
        };
        let kept = nms(vec![overlapping, a.clone(), other_class.clone()], 0.5);
        assert_eq!(kept, vec![a, other_class]);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
        assert_eq!(iou(&[0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 2.0, 2.0]), 1.0);
        assert_eq!(iou(&[0.0, 0.0, 0.0, 0.0], &[0.0, 0.0, 0.0, 0.0]), 0.0);
    }
}
