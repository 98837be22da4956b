//! ArcFace face recognizer.
//!
//! Extracts face embeddings from aligned 112×112 face crops.

use crate::alignment::{self, AlignmentError, ALIGNED_SIZE};
use crate::engine::{EngineError, InferenceEngine, OrtEngine};
use crate::types::{Embedding, Normalization};
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — place the ArcFace model in the model directory")]
    ModelNotFound(String),
    #[error("alignment failed: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub normalization: Normalization,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::UNIT,
        }
    }
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    engine: Arc<dyn InferenceEngine>,
    config: RecognizerConfig,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(
        model_path: &Path,
        intra_threads: usize,
        config: RecognizerConfig,
    ) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let engine = OrtEngine::load(model_path, intra_threads)?;
        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self::with_engine(Arc::new(engine), config))
    }

    pub fn with_engine(engine: Arc<dyn InferenceEngine>, config: RecognizerConfig) -> Self {
        Self { engine, config }
    }

    pub fn model_name(&self) -> &str {
        self.engine.name()
    }

    /// Extract a unit-norm embedding for the face described by `landmarks`.
    ///
    /// Degenerate landmarks fail with [`RecognizerError::Alignment`]; the
    /// network never sees a blank crop.
    pub fn extract_embedding(
        &self,
        image: &RgbImage,
        landmarks: &[(f32, f32)],
    ) -> Result<Embedding, RecognizerError> {
        let aligned = alignment::align_face(image, landmarks)?;
        self.embed_aligned(&aligned)
    }

    /// Run the network on an already-aligned 112×112 face.
    pub fn embed_aligned(&self, aligned: &RgbImage) -> Result<Embedding, RecognizerError> {
        if aligned.dimensions() != (ALIGNED_SIZE, ALIGNED_SIZE) {
            return Err(RecognizerError::InferenceFailed(format!(
                "aligned face must be {ALIGNED_SIZE}x{ALIGNED_SIZE}, got {}x{}",
                aligned.width(),
                aligned.height()
            )));
        }

        let input = Self::preprocess(aligned, self.config.normalization);
        let outputs = self.engine.run(input.view())?;

        let raw = outputs
            .into_iter()
            .next()
            .map(|t| t.data)
            .filter(|data| !data.is_empty())
            .ok_or_else(|| RecognizerError::InferenceFailed("network produced no embedding".into()))?;

        Ok(Embedding::from_raw(
            raw,
            Some(self.engine.name().to_string()),
        ))
    }

    /// Convert an aligned RGB crop into a normalized NCHW float tensor.
    fn preprocess(aligned: &RgbImage, norm: Normalization) -> Array4<f32> {
        let (w, h) = (aligned.width() as usize, aligned.height() as usize);
        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));

        for (x, y, pixel) in aligned.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = norm.apply(pixel[c]);
            }
        }

        tensor
    }
}
