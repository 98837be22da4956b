use crate::types::Detection;
use std::cmp::Ordering;

/// Greedy Non-Maximum Suppression.
///
/// Detections are stably sorted by confidence (highest first); each kept
/// detection suppresses every later one whose IoU with it is at or above
/// `iou_threshold`. The result stays in confidence-descending order.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && detections[i].bbox.iou(&detections[j].bbox) >= iou_threshold {
                suppressed[j] = true;
            }
        }
        keep.push(detections[i].clone());
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn make_det(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x1, y1, x2, y2 },
            confidence: conf,
            landmarks: [(0.0, 0.0); 5],
        }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_det(5.0, 5.0, 105.0, 105.0, 0.8),
            make_det(0.0, 0.0, 100.0, 100.0, 0.9),
            make_det(200.0, 200.0, 250.0, 250.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    /// Two 10x10 boxes offset by 2.5 px horizontally overlap with IoU 0.6.
    fn iou_point_six_pair() -> Vec<Detection> {
        vec![
            make_det(0.0, 0.0, 10.0, 10.0, 0.9),
            make_det(2.5, 0.0, 12.5, 10.0, 0.8),
        ]
    }

    #[test]
    fn test_nms_threshold_below_overlap_suppresses() {
        let pair = iou_point_six_pair();
        assert!((pair[0].bbox.iou(&pair[1].bbox) - 0.6).abs() < 1e-6);

        let result = nms(pair, 0.4);
        assert_eq!(result.len(), 1);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_nms_threshold_above_overlap_keeps_both() {
        let result = nms(iou_point_six_pair(), 0.7);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_nms_equal_iou_is_suppressed() {
        let result = nms(iou_point_six_pair(), 0.6);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_nms_ties_keep_emission_order() {
        let detections = vec![
            make_det(0.0, 0.0, 10.0, 10.0, 0.5),
            make_det(1.0, 1.0, 11.0, 11.0, 0.5),
        ];
        let result = nms(detections, 0.3);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].bbox.x1, 0.0);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_nms_output_invariants() {
        // Deterministic scatter of overlapping boxes.
        let mut detections = Vec::new();
        for i in 0..40u32 {
            let x = ((i * 37) % 90) as f32;
            let y = ((i * 53) % 70) as f32;
            let w = 10.0 + ((i * 11) % 25) as f32;
            let conf = ((i * 29) % 100) as f32 / 100.0;
            detections.push(make_det(x, y, x + w, y + w, conf));
        }

        let threshold = 0.35;
        let result = nms(detections.clone(), threshold);

        assert!(!result.is_empty());
        for pair in result.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        for (i, a) in result.iter().enumerate() {
            assert!(detections.contains(a), "kept detection not in input");
            for b in &result[i + 1..] {
                assert!(a.bbox.iou(&b.bbox) < threshold);
            }
        }
    }
}
