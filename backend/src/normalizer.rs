use shared::DetectionRecord;

use crate::detector::{LabelTable, RawDetection};

pub fn class_name(labels: Option<&LabelTable>, class_id: usize) -> String {
    labels
        .and_then(|table| table.get(class_id))
        .map(str::to_string)
        .unwrap_or_else(|| format!("class_{}", class_id))
}

fn round_to(value: f32, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value as f64 * factor).round_ties_even() / factor
}

/// Maps engine detections to response records, keeping engine order.
pub fn normalize(detections: &[RawDetection], labels: Option<&LabelTable>) -> Vec<DetectionRecord> {
    detections
        .iter()
        .map(|d| DetectionRecord {
            class_name: class_name(labels, d.class_id),
            confidence: round_to(d.confidence, 4),
            coordinates: d.bbox.map(|c| round_to(c, 2)),
        })
        .collect()
}
