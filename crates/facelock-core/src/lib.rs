//! facelock-core: face detection and recognition geometry.
//!
//! Turns raw SCRFD detector outputs into face detections (output
//! classification, per-scale decoding, letterbox inversion, NMS) and aligns
//! faces for ArcFace embedding extraction. Both networks run through ONNX
//! Runtime behind the [`InferenceEngine`] trait.

pub mod alignment;
pub mod decode;
pub mod detector;
pub mod engine;
pub mod letterbox;
pub mod nms;
pub mod recognizer;
pub mod topology;
pub mod types;

use std::path::PathBuf;

pub use alignment::{align_face, AlignmentError};
pub use detector::{DetectorConfig, DetectorError, FaceDetector};
pub use engine::{EngineError, InferenceEngine, OrtEngine, RawOutputTensor};
pub use letterbox::TransformInfo;
pub use recognizer::{FaceRecognizer, RecognizerConfig, RecognizerError};
pub use types::{BoundingBox, Detection, Embedding, Normalization};

/// Default SCRFD model file name.
pub const DETECTOR_MODEL_FILE: &str = "scrfd_person_2.5g.onnx";
/// Default ArcFace model file name.
pub const RECOGNIZER_MODEL_FILE: &str = "arcface_r50.onnx";

/// System-wide model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facelock/models")
}
