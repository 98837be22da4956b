use crate::engine::{EngineError, EngineHandle, ImagePayload};
use serde::Serialize;
use zbus::interface;

/// D-Bus interface for the facelock inference daemon.
///
/// Bus name: org.facelock.Inference1
/// Object path: /org/facelock/Inference1
pub struct FacelockService {
    pub engine: EngineHandle,
}

impl FacelockService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.facelock.Inference1")]
impl FacelockService {
    /// Detect faces in an encoded (`jpeg`, `png`) or `raw` image.
    ///
    /// Thresholds `<= 0` use the daemon's configured defaults.
    async fn detect_faces(
        &self,
        image: Vec<u8>,
        format: &str,
        width: u32,
        height: u32,
        channels: u32,
        confidence_threshold: f64,
        nms_threshold: f64,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), format, "detect requested");
        let payload = ImagePayload {
            data: image,
            format: format.to_string(),
            width,
            height,
            channels,
        };

        let reply = self
            .engine
            .detect(payload, confidence_threshold as f32, nms_threshold as f32)
            .await
            .map_err(to_fdo)?;
        to_json(&reply)
    }

    /// Extract a face embedding from the five landmarks of a detection.
    async fn extract_embedding(
        &self,
        image: Vec<u8>,
        format: &str,
        width: u32,
        height: u32,
        channels: u32,
        landmarks: Vec<(f64, f64)>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), format, landmarks = landmarks.len(), "embedding requested");
        let payload = ImagePayload {
            data: image,
            format: format.to_string(),
            width,
            height,
            channels,
        };

        let reply = self
            .engine
            .extract_embedding(payload, landmarks)
            .await
            .map_err(to_fdo)?;
        to_json(&reply)
    }

    /// Return daemon health and loaded models.
    async fn health(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.health())
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    if err.is_invalid_request() {
        tracing::info!(error = %err, "rejecting request");
        zbus::fdo::Error::InvalidArgs(err.to_string())
    } else {
        tracing::error!(error = %err, "inference failed");
        zbus::fdo::Error::Failed(err.to_string())
    }
}

fn to_json<T: Serialize>(reply: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(reply).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_input::InputError;

    #[test]
    fn test_bad_input_maps_to_invalid_args() {
        let err = EngineError::Input(InputError::UnsupportedFormat("gif".into()));
        assert!(matches!(to_fdo(err), zbus::fdo::Error::InvalidArgs(_)));
    }

    #[test]
    fn test_model_failure_maps_to_failed() {
        let err = EngineError::Detector(facelock_core::DetectorError::DecodeFailure(
            "rows".into(),
        ));
        assert!(matches!(to_fdo(err), zbus::fdo::Error::Failed(_)));
    }
}
