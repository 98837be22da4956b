use facelock_core::{DetectorConfig, RecognizerConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file read when `FACELOCK_CONFIG` is not set.
const DEFAULT_CONFIG_PATH: &str = "/etc/facelock/facelockd.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration: optional TOML file, then `FACELOCK_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Detector model file name inside `model_dir`.
    pub detector_model: String,
    /// Recognizer model file name inside `model_dir`.
    pub recognizer_model: String,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    pub bus: BusKind,
    pub detector: DetectorConfig,
    pub recognizer: RecognizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facelock_core::default_model_dir(),
            detector_model: facelock_core::DETECTOR_MODEL_FILE.to_string(),
            recognizer_model: facelock_core::RECOGNIZER_MODEL_FILE.to_string(),
            intra_threads: 2,
            bus: BusKind::Session,
            detector: DetectorConfig::default(),
            recognizer: RecognizerConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("FACELOCK_CONFIG").ok().map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `FACELOCK_*` variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("FACELOCK_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(name) = var("FACELOCK_DETECTOR_MODEL") {
            self.detector_model = name;
        }
        if let Some(name) = var("FACELOCK_RECOGNIZER_MODEL") {
            self.recognizer_model = name;
        }
        if let Some(bus) = var("FACELOCK_BUS") {
            match bus.as_str() {
                "system" => self.bus = BusKind::System,
                "session" => self.bus = BusKind::Session,
                other => tracing::warn!(value = other, "ignoring unknown FACELOCK_BUS"),
            }
        }

        self.intra_threads = parse_or(&var, "FACELOCK_INTRA_THREADS", self.intra_threads);
        self.detector.input_size = parse_or(&var, "FACELOCK_INPUT_SIZE", self.detector.input_size);
        self.detector.confidence_threshold = parse_or(
            &var,
            "FACELOCK_CONFIDENCE_THRESHOLD",
            self.detector.confidence_threshold,
        );
        self.detector.nms_threshold =
            parse_or(&var, "FACELOCK_NMS_THRESHOLD", self.detector.nms_threshold);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f32| {
            if v > 0.0 && v <= 1.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be in (0, 1], got {v}")))
            }
        };
        unit("confidence_threshold", self.detector.confidence_threshold)?;
        unit("nms_threshold", self.detector.nms_threshold)?;

        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(ConfigError::Invalid(format!(
                "input_size must be a positive multiple of 32, got {}",
                self.detector.input_size
            )));
        }
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be at least 1".into()));
        }
        for (name, norm) in [
            ("detector", self.detector.normalization),
            ("recognizer", self.recognizer.normalization),
        ] {
            if norm.std == 0.0 {
                return Err(ConfigError::Invalid(format!("{name} normalization std must be non-zero")));
            }
        }
        Ok(())
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match var(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable override");
            default
        }),
        None => default,
    }
}
