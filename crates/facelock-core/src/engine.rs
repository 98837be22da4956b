//! Tensor-execution engine seam.
//!
//! Detector and recognizer only see [`InferenceEngine`]; the ONNX Runtime
//! backed [`OrtEngine`] is the production implementation.

use ndarray::ArrayView4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
    #[error("session lock poisoned by a panicked inference call")]
    Poisoned,
    #[error("output {name}: {reason}")]
    Output { name: String, reason: String },
}

/// One named output tensor from an inference call, copied out of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutputTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawOutputTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
        }
    }
}

/// A loaded network that maps one NCHW input tensor to its output tensors.
///
/// Implementations must tolerate concurrent `run` calls from several threads.
pub trait InferenceEngine: Send + Sync {
    /// Run the network, returning outputs in the model's declared order.
    fn run(&self, input: ArrayView4<'_, f32>) -> Result<Vec<RawOutputTensor>, EngineError>;

    /// Human-readable identifier for logs and health reporting.
    fn name(&self) -> &str;
}

/// ONNX Runtime session behind a mutex.
///
/// `ort` needs exclusive access to run a session, so concurrent callers of
/// the same handle are serialized here.
pub struct OrtEngine {
    session: Mutex<Session>,
    name: String,
    output_names: Vec<String>,
}

impl OrtEngine {
    /// Load an ONNX model. The caller is responsible for checking the file exists.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, EngineError> {
        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        let name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_path.display().to_string());

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded ONNX model"
        );

        Ok(Self {
            session: Mutex::new(session),
            name,
            output_names,
        })
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

impl InferenceEngine for OrtEngine {
    fn run(&self, input: ArrayView4<'_, f32>) -> Result<Vec<RawOutputTensor>, EngineError> {
        let mut session = self.session.lock().map_err(|_| EngineError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input)?])?;

        let mut tensors = Vec::with_capacity(self.output_names.len());
        for (idx, name) in self.output_names.iter().enumerate() {
            let (shape, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::Output {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            let shape = shape
                .iter()
                .map(|&d| {
                    usize::try_from(d).map_err(|_| EngineError::Output {
                        name: name.clone(),
                        reason: format!("negative dimension {d}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            tensors.push(RawOutputTensor::new(name.clone(), shape, data.to_vec()));
        }

        Ok(tensors)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
