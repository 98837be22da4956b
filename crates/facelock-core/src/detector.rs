//! SCRFD face detector.
//!
//! Letterboxes the image, runs the detection network, classifies its outputs
//! by shape, decodes every scale and finishes with NMS.

use crate::decode::decode_scale;
use crate::engine::{EngineError, InferenceEngine, OrtEngine};
use crate::letterbox::letterbox;
use crate::nms::nms;
use crate::topology::classify_outputs;
use crate::types::{Detection, Normalization};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const SCRFD_INPUT_SIZE: u32 = 640;
pub const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const SCRFD_NMS_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the SCRFD model in the model directory")]
    ModelNotFound(String),
    #[error("image has zero area ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error(
        "detector output groups disagree: {scores} score, {boxes} box, {landmarks} landmark tensors"
    )]
    TopologyMismatch {
        scores: usize,
        boxes: usize,
        landmarks: usize,
    },
    #[error("failed to decode detector outputs: {0}")]
    DecodeFailure(String),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

/// Detector tuning. Thresholds are per-call defaults and can be overridden
/// in [`FaceDetector::detect`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Side of the square network input.
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub normalization: Normalization,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: SCRFD_INPUT_SIZE,
            confidence_threshold: SCRFD_CONFIDENCE_THRESHOLD,
            nms_threshold: SCRFD_NMS_THRESHOLD,
            normalization: Normalization::UNIT,
        }
    }
}

/// SCRFD-based face detector.
///
/// Holds no per-call state; `detect` may be called from many threads at once.
pub struct FaceDetector {
    engine: Arc<dyn InferenceEngine>,
    config: DetectorConfig,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(
        model_path: &Path,
        intra_threads: usize,
        config: DetectorConfig,
    ) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let engine = OrtEngine::load(model_path, intra_threads)?;
        tracing::info!(
            path = %model_path.display(),
            input_size = config.input_size,
            outputs = engine.output_names().len(),
            "loaded SCRFD model"
        );

        Ok(Self::with_engine(Arc::new(engine), config))
    }

    /// Build a detector over an already-loaded engine.
    pub fn with_engine(engine: Arc<dyn InferenceEngine>, config: DetectorConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn model_name(&self) -> &str {
        self.engine.name()
    }

    /// Detect faces in an RGB image.
    ///
    /// Returns detections in original-image pixels, sorted by confidence
    /// (highest first). A detector whose outputs cannot be paired up by scale
    /// yields no detections rather than guessed ones.
    pub fn detect(
        &self,
        image: &RgbImage,
        confidence_threshold: Option<f32>,
        nms_threshold: Option<f32>,
    ) -> Result<Vec<Detection>, DetectorError> {
        let confidence_threshold =
            confidence_threshold.unwrap_or(self.config.confidence_threshold);
        let nms_threshold = nms_threshold.unwrap_or(self.config.nms_threshold);

        let (input, transform) =
            letterbox(image, self.config.input_size, self.config.normalization)?;

        let outputs = self.engine.run(input.view())?;

        let topology = match classify_outputs(outputs, self.config.input_size as usize) {
            Ok(topology) => topology,
            Err(err @ DetectorError::TopologyMismatch { .. }) => {
                tracing::warn!(model = self.engine.name(), error = %err, "skipping detection");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let candidates: Vec<Detection> = topology
            .scales
            .iter()
            .flat_map(|scale| decode_scale(scale, &transform, confidence_threshold))
            .collect();
        let num_candidates = candidates.len();

        let detections = nms(candidates, nms_threshold);
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            candidates = num_candidates,
            kept = detections.len(),
            "face detection complete"
        );

        Ok(detections)
    }
}
