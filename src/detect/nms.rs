use std::cmp::Ordering;

use crate::detect::result::RawDetection;

/// Class-aware non-maximum suppression.
///
/// Detections are visited in descending confidence; a detection is discarded
/// when it overlaps an already kept detection of the same class by more than
/// `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn det(class_id: usize, confidence: f32, x: i32) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox: BoundingBox::new(x, 0, x + 10, 10),
        }
    }

    #[test]
    fn suppresses_overlapping_same_class() {
        let out = non_max_suppression(vec![det(0, 0.6, 1), det(0, 0.9, 0), det(0, 0.7, 50)], 0.5);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.9);
        assert_eq!(out[1].confidence, 0.7);
    }

    #[test]
    fn keeps_overlapping_different_classes() {
        let out = non_max_suppression(vec![det(0, 0.9, 0), det(1, 0.8, 0)], 0.5);
        assert_eq!(out.len(), 2);
    }
}
