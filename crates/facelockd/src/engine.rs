use crate::config::Config;
use crate::image_input::{self, ImageRequest, InputError};
use facelock_core::{Detection, DetectorError, FaceDetector, FaceRecognizer, RecognizerError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid image: {0}")]
    Input(#[from] InputError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("inference task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Whether the caller sent something unusable, as opposed to a server-side failure.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            EngineError::Input(_)
                | EngineError::Detector(DetectorError::EmptyImage { .. })
                | EngineError::Recognizer(RecognizerError::Alignment(_))
        )
    }
}

/// Owned image payload moved onto the blocking pool.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: Vec<u8>,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl ImagePayload {
    fn decode(&self) -> Result<image::RgbImage, InputError> {
        image_input::decode_image(ImageRequest {
            data: &self.data,
            format: &self.format,
            width: self.width,
            height: self.height,
            channels: self.channels,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectReply {
    pub detections: Vec<Detection>,
    pub inference_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingReply {
    pub embedding: Vec<f32>,
    pub model_version: Option<String>,
    pub inference_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReply {
    pub healthy: bool,
    pub version: &'static str,
    pub device: &'static str,
    pub models_loaded: Vec<String>,
}

/// Clone-safe handle to the loaded detector and recognizer.
///
/// Each request runs on tokio's blocking pool; concurrent requests share the
/// networks through their engines.
#[derive(Clone)]
pub struct EngineHandle {
    detector: Arc<FaceDetector>,
    recognizer: Arc<FaceRecognizer>,
}

impl EngineHandle {
    /// Load both ONNX models. Fails fast if either is missing or unloadable.
    pub fn load(config: &Config) -> Result<Self, EngineError> {
        let detector_path = config.detector_model_path();
        let detector = FaceDetector::load(&detector_path, config.intra_threads, config.detector.clone())?;
        tracing::info!(path = %detector_path.display(), "SCRFD detector loaded");

        let recognizer_path = config.recognizer_model_path();
        let recognizer = FaceRecognizer::load(
            &recognizer_path,
            config.intra_threads,
            config.recognizer.clone(),
        )?;
        tracing::info!(path = %recognizer_path.display(), "ArcFace recognizer loaded");

        Ok(Self::new(detector, recognizer))
    }

    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector: Arc::new(detector),
            recognizer: Arc::new(recognizer),
        }
    }

    /// Detect faces. Thresholds `<= 0` fall back to the configured defaults.
    pub async fn detect(
        &self,
        image: ImagePayload,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Result<DetectReply, EngineError> {
        let detector = Arc::clone(&self.detector);
        let confidence = positive(confidence_threshold);
        let nms = positive(nms_threshold);

        tokio::task::spawn_blocking(move || -> Result<DetectReply, EngineError> {
            let start = Instant::now();
            let rgb = image.decode()?;
            let detections = detector.detect(&rgb, confidence, nms)?;
            let inference_time_ms = elapsed_ms(start);
            tracing::debug!(
                faces = detections.len(),
                width = rgb.width(),
                height = rgb.height(),
                inference_time_ms,
                "detect complete"
            );
            Ok(DetectReply {
                detections,
                inference_time_ms,
            })
        })
        .await?
    }

    /// Align the face described by `landmarks` and extract its embedding.
    pub async fn extract_embedding(
        &self,
        image: ImagePayload,
        landmarks: Vec<(f64, f64)>,
    ) -> Result<EmbeddingReply, EngineError> {
        let recognizer = Arc::clone(&self.recognizer);
        let landmarks: Vec<(f32, f32)> = landmarks
            .into_iter()
            .map(|(x, y)| (x as f32, y as f32))
            .collect();

        tokio::task::spawn_blocking(move || -> Result<EmbeddingReply, EngineError> {
            let start = Instant::now();
            let rgb = image.decode()?;
            let embedding = recognizer.extract_embedding(&rgb, &landmarks)?;
            let inference_time_ms = elapsed_ms(start);
            tracing::debug!(dim = embedding.dim(), inference_time_ms, "embedding complete");
            Ok(EmbeddingReply {
                embedding: embedding.values,
                model_version: embedding.model_version,
                inference_time_ms,
            })
        })
        .await?
    }

    pub fn health(&self) -> HealthReply {
        HealthReply {
            healthy: true,
            version: env!("CARGO_PKG_VERSION"),
            device: "cpu",
            models_loaded: vec![
                self.detector.model_name().to_string(),
                self.recognizer.model_name().to_string(),
            ],
        }
    }
}

fn positive(threshold: f32) -> Option<f32> {
    (threshold > 0.0).then_some(threshold)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
