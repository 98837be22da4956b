//! End-to-end detection and embedding through stand-in engines.

use facelock_core::{
    AlignmentError, DetectorConfig, EngineError, FaceDetector, FaceRecognizer, InferenceEngine,
    RawOutputTensor, RecognizerConfig, RecognizerError,
};
use image::{Rgb, RgbImage};
use ndarray::ArrayView4;
use std::sync::Arc;

/// One hot anchor to plant in the fake detector outputs.
struct Anchor {
    grid: usize,
    row: usize,
    col: usize,
    score: f32,
    bbox: [f32; 4],
    kps: [f32; 10],
}

struct FakeScrfd {
    outputs: Vec<RawOutputTensor>,
}

impl FakeScrfd {
    fn new(anchors: &[Anchor]) -> Self {
        let mut outputs = Vec::new();
        // Emit groups in a shuffled order to exercise classification.
        for grid in [40usize, 20, 80] {
            let n = grid * grid;
            let mut scores = vec![0.01; n];
            let mut boxes = vec![0.0; n * 4];
            let mut kps = vec![0.0; n * 10];
            for a in anchors.iter().filter(|a| a.grid == grid) {
                let idx = a.row * grid + a.col;
                scores[idx] = a.score;
                boxes[idx * 4..idx * 4 + 4].copy_from_slice(&a.bbox);
                kps[idx * 10..idx * 10 + 10].copy_from_slice(&a.kps);
            }
            outputs.push(RawOutputTensor::new(format!("{grid}_kps"), vec![1, n, 10], kps));
            outputs.push(RawOutputTensor::new(format!("{grid}_bbox"), vec![1, n, 4], boxes));
            outputs.push(RawOutputTensor::new(format!("{grid}_score"), vec![1, n, 1], scores));
        }
        Self { outputs }
    }
}

impl InferenceEngine for FakeScrfd {
    fn run(&self, input: ArrayView4<'_, f32>) -> Result<Vec<RawOutputTensor>, EngineError> {
        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        Ok(self.outputs.clone())
    }

    fn name(&self) -> &str {
        "fake_scrfd"
    }
}

/// Returns `[mean, mean]` of its input, so a blank crop yields a zero vector.
struct MeanEmbedder;

impl InferenceEngine for MeanEmbedder {
    fn run(&self, input: ArrayView4<'_, f32>) -> Result<Vec<RawOutputTensor>, EngineError> {
        let mean = input.mean().unwrap_or(0.0);
        Ok(vec![RawOutputTensor::new("fc1", vec![1, 2], vec![mean, mean])])
    }

    fn name(&self) -> &str {
        "mean_embedder"
    }
}

const FACE_KPS: [f32; 10] = [-0.8, -0.8, 0.8, -0.8, 0.0, 0.0, -0.6, 0.9, 0.6, 0.9];

fn scene() -> Vec<Anchor> {
    vec![
        // Main face on the stride-16 grid.
        Anchor {
            grid: 40,
            row: 15,
            col: 20,
            score: 0.85,
            bbox: [2.0, 2.5, 2.0, 2.5],
            kps: FACE_KPS,
        },
        // Weaker duplicate of the same face on the stride-8 grid.
        Anchor {
            grid: 80,
            row: 31,
            col: 41,
            score: 0.7,
            bbox: [4.0, 5.0, 3.5, 4.5],
            kps: [0.0; 10],
        },
        // Separate face on the stride-32 grid with collapsed landmarks.
        Anchor {
            grid: 20,
            row: 8,
            col: 3,
            score: 0.6,
            bbox: [1.0, 1.0, 1.0, 1.0],
            kps: [0.0; 10],
        },
    ]
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
}

#[test]
fn detects_and_embeds_through_letterbox() {
    let detector = FaceDetector::with_engine(
        Arc::new(FakeScrfd::new(&scene())),
        DetectorConfig::default(),
    );
    let recognizer = FaceRecognizer::with_engine(Arc::new(MeanEmbedder), RecognizerConfig::default());

    // 1280x720 letterboxes at scale 0.5 with 140 px of padding above and below.
    let image = RgbImage::from_pixel(1280, 720, Rgb([200, 200, 200]));
    let faces = detector.detect(&image, None, None).unwrap();

    assert_eq!(faces.len(), 2, "duplicate should be suppressed: {faces:?}");
    assert!(approx(faces[0].confidence, 0.85));
    assert!(approx(faces[1].confidence, 0.6));

    // Square-space box (296, 208)-(360, 288) mapped back to the original image.
    let b = faces[0].bbox;
    assert!(approx(b.x1, 592.0) && approx(b.y1, 136.0), "{b:?}");
    assert!(approx(b.x2, 720.0) && approx(b.y2, 296.0), "{b:?}");

    let (cx, cy) = (328.0f32, 248.0f32);
    let (lx, ly) = faces[0].landmarks[0];
    assert!(approx(lx, (cx - 12.8) * 2.0));
    assert!(approx(ly, (cy - 12.8 - 140.0) * 2.0));

    let embedding = recognizer
        .extract_embedding(&image, &faces[0].landmarks)
        .unwrap();
    assert_eq!(embedding.dim(), 2);
    let expected = std::f32::consts::FRAC_1_SQRT_2;
    assert!(approx(embedding.values[0], expected), "{:?}", embedding.values);
    assert_eq!(embedding.model_version.as_deref(), Some("mean_embedder"));

    // The second face's landmarks all sit on its anchor centre.
    let err = recognizer
        .extract_embedding(&image, &faces[1].landmarks)
        .unwrap_err();
    assert!(matches!(err, RecognizerError::Alignment(AlignmentError::Singular)));
}

#[test]
fn detector_is_shareable_across_threads() {
    let detector = Arc::new(FaceDetector::with_engine(
        Arc::new(FakeScrfd::new(&scene())),
        DetectorConfig::default(),
    ));
    let image = RgbImage::from_pixel(1280, 720, Rgb([10, 20, 30]));
    let baseline = detector.detect(&image, None, None).unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| detector.detect(&image, None, None).unwrap()))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), baseline);
        }
    });
}

#[test]
fn looser_nms_keeps_duplicate() {
    let detector = FaceDetector::with_engine(
        Arc::new(FakeScrfd::new(&scene())),
        DetectorConfig::default(),
    );
    let image = RgbImage::new(1280, 720);
    let faces = detector.detect(&image, Some(0.5), Some(0.95)).unwrap();
    assert_eq!(faces.len(), 3);
    let confidences: Vec<f32> = faces.iter().map(|f| f.confidence).collect();
    assert!(confidences.windows(2).all(|w| w[0] >= w[1]));
}
