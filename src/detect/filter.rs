use crate::detect::labels::ClassNames;
use crate::detect::result::{Detection, RawDetection};
use crate::settings::DetectionSettings;

/// Apply the confidence and minimum-area thresholds to one pass.
///
/// Keeps a detection iff `confidence > confidence_threshold` and
/// `area > min_detection_area`, preserving order. Class ids missing from the
/// class table are dropped.
pub fn filter_detections(
    raw: &[RawDetection],
    classes: &ClassNames,
    settings: &DetectionSettings,
) -> Vec<Detection> {
    raw.iter()
        .filter(|det| det.confidence > settings.confidence_threshold)
        .filter_map(|det| {
            let area = det.bbox.area();
            if area <= settings.min_detection_area {
                return None;
            }
            let Some(name) = classes.name(det.class_id) else {
                log::debug!("dropping detection with unknown class id {}", det.class_id);
                return None;
            };
            Some(Detection {
                name: name.to_string(),
                confidence: det.confidence,
                bbox: det.bbox,
                area,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn raw(class_id: usize, confidence: f32, side: i32) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox: BoundingBox::new(0, 0, side, side),
        }
    }

    fn classes() -> ClassNames {
        ClassNames::new(vec!["A".into(), "B".into(), "C".into()]).unwrap()
    }

    #[test]
    fn keeps_only_strictly_above_thresholds_in_order() {
        let settings = DetectionSettings {
            confidence_threshold: 0.3,
            min_detection_area: 100,
            ..DetectionSettings::default()
        };
        let input = vec![
            raw(2, 0.95, 20), // kept
            raw(0, 0.30, 20), // confidence equal to threshold
            raw(1, 0.80, 10), // area equal to minimum
            raw(0, 0.31, 11), // kept
            raw(1, 0.10, 50),
        ];
        let out = filter_detections(&input, &classes(), &settings);
        let names: Vec<_> = out.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["C", "A"]);
        assert_eq!(out[0].area, 400);
        assert_eq!(out[1].area, 121);
    }

    #[test]
    fn unknown_class_ids_are_dropped() {
        let settings = DetectionSettings::default();
        let out = filter_detections(&[raw(9, 0.9, 50)], &classes(), &settings);
        assert!(out.is_empty());
    }

    #[test]
    fn threshold_change_applies_to_later_calls_only() {
        let input = vec![raw(0, 0.5, 50)];
        let mut settings = DetectionSettings::default();
        let before = filter_detections(&input, &classes(), &settings);
        settings.confidence_threshold = 0.6;
        let after = filter_detections(&input, &classes(), &settings);
        assert_eq!(before.len(), 1);
        assert!(after.is_empty());
    }
}
