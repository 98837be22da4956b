//! Anchor-free SCRFD decoding for a single scale.

use crate::letterbox::TransformInfo;
use crate::topology::ScaleOutputs;
use crate::types::{BoundingBox, Detection};

/// Decode every anchor of `scale` whose score reaches `threshold`.
///
/// Boxes are distances from the anchor centre to each edge and landmarks are
/// offsets from the centre, both in units of the stride. Results are mapped
/// back to original-image pixels through `transform`.
pub fn decode_scale(
    scale: &ScaleOutputs,
    transform: &TransformInfo,
    threshold: f32,
) -> Vec<Detection> {
    let stride = scale.group.stride as f32;
    let grid_side = scale.group.grid_side;
    let apc = scale.group.anchors_per_position;

    let kept = scale
        .scores
        .data
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score >= threshold);

    let mut detections = Vec::new();
    for (idx, &score) in kept {
        let position = idx / apc;
        let row = position / grid_side;
        let col = position % grid_side;
        let cx = (col as f32 + 0.5) * stride;
        let cy = (row as f32 + 0.5) * stride;

        let d = scale.boxes.row(idx);
        let (x1, y1) = transform.remap(cx - d[0] * stride, cy - d[1] * stride);
        let (x2, y2) = transform.remap(cx + d[2] * stride, cy + d[3] * stride);

        let kps = scale.landmarks.row(idx);
        let landmarks: [(f32, f32); 5] = std::array::from_fn(|i| {
            transform.remap(cx + kps[i * 2] * stride, cy + kps[i * 2 + 1] * stride)
        });

        detections.push(Detection {
            bbox: BoundingBox { x1, y1, x2, y2 },
            confidence: score,
            landmarks,
        });
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{OutputMatrix, ScaleGroup};

    fn matrix(rows: usize, cols: usize) -> OutputMatrix {
        OutputMatrix {
            name: String::new(),
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    fn scale(stride: usize, apc: usize, input_size: usize) -> ScaleOutputs {
        let group = ScaleGroup {
            stride,
            anchors_per_position: apc,
            grid_side: input_size / stride,
        };
        let n = group.anchor_count();
        ScaleOutputs {
            group,
            scores: matrix(n, 1),
            boxes: matrix(n, 4),
            landmarks: matrix(n, 10),
        }
    }

    fn identity_640() -> TransformInfo {
        TransformInfo::compute(640, 640, 640).unwrap()
    }

    #[test]
    fn test_single_anchor_top_left() {
        let mut s = scale(8, 1, 640);
        s.scores.data[0] = 0.9;
        s.boxes.data[..4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let dets = decode_scale(&s, &identity_640(), 0.5);
        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        assert!((det.confidence - 0.9).abs() < 1e-6);
        // Raw box is (-4, -4, 12, 12); the remapper clamps the negative corner.
        assert_eq!(det.bbox, BoundingBox { x1: 0.0, y1: 0.0, x2: 12.0, y2: 12.0 });
        for &(x, y) in &det.landmarks {
            assert_eq!((x, y), (4.0, 4.0));
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut s = scale(32, 1, 640);
        s.scores.data[3] = 0.5;
        s.scores.data[4] = 0.49;
        let dets = decode_scale(&s, &identity_640(), 0.5);
        assert_eq!(dets.len(), 1);
    }

    #[test]
    fn test_anchor_grid_position_with_two_anchors() {
        // stride 16, grid 40, 2 anchors per cell: index 2*(3*40 + 5) + 1 is row 3, col 5.
        let mut s = scale(16, 2, 640);
        let idx = 2 * (3 * 40 + 5) + 1;
        s.scores.data[idx] = 0.8;
        s.boxes.data[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.25, 0.5, 0.25]);
        let mut kps = [0.0f32; 10];
        kps[0] = -1.0; // left eye one stride left of centre
        kps[3] = 1.0; // right eye one stride below centre
        s.landmarks.data[idx * 10..idx * 10 + 10].copy_from_slice(&kps);

        let dets = decode_scale(&s, &identity_640(), 0.5);
        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        let (cx, cy) = (5.5 * 16.0, 3.5 * 16.0);
        assert_eq!(det.bbox, BoundingBox { x1: cx - 8.0, y1: cy - 4.0, x2: cx + 8.0, y2: cy + 4.0 });
        assert_eq!(det.landmarks[0], (cx - 16.0, cy));
        assert_eq!(det.landmarks[1], (cx, cy + 16.0));
        assert_eq!(det.landmarks[2], (cx, cy));
    }

    #[test]
    fn test_decode_maps_through_letterbox() {
        // 1280x720 → scale 0.5, vertical padding 140.
        let transform = TransformInfo::compute(1280, 720, 640).unwrap();
        let mut s = scale(32, 1, 640);
        // Cell row 6, col 10: centre (336, 208) in square space.
        let idx = 6 * 20 + 10;
        s.scores.data[idx] = 0.7;
        s.boxes.data[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let dets = decode_scale(&s, &transform, 0.5);
        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        assert!((b.x1 - (336.0 - 32.0) * 2.0).abs() < 1e-3);
        assert!((b.y1 - (208.0 - 32.0 - 140.0) * 2.0).abs() < 1e-3);
        assert!((b.x2 - (336.0 + 32.0) * 2.0).abs() < 1e-3);
        assert!((b.y2 - (208.0 + 32.0 - 140.0) * 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_no_anchor_above_threshold() {
        let s = scale(8, 2, 640);
        assert!(decode_scale(&s, &identity_640(), 0.5).is_empty());
    }
}
