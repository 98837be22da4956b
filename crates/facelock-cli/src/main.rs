use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use facelock_core::{Detection, DetectorConfig, Embedding, FaceDetector, FaceRecognizer, RecognizerConfig};
use image::RgbImage;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facelock", about = "facelock face detection and recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in an image and print them as JSON
    Detect {
        image: PathBuf,
        /// Minimum detection score (default: 0.5)
        #[arg(long)]
        confidence: Option<f32>,
        /// NMS IoU threshold (default: 0.4)
        #[arg(long)]
        nms: Option<f32>,
        /// Send the image to facelockd instead of running locally
        #[arg(long)]
        remote: bool,
        #[command(flatten)]
        bus: BusArgs,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Print the embedding of the most confident face in an image
    Embed {
        image: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Compare the most confident faces of two images by cosine similarity
    Compare {
        first: PathBuf,
        second: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Show daemon health
    Health {
        #[command(flatten)]
        bus: BusArgs,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// Directory containing the ONNX models
    #[arg(long, default_value_os_t = facelock_core::default_model_dir())]
    model_dir: PathBuf,
    #[arg(long, default_value = facelock_core::DETECTOR_MODEL_FILE)]
    detector_model: String,
    #[arg(long, default_value = facelock_core::RECOGNIZER_MODEL_FILE)]
    recognizer_model: String,
    /// ONNX Runtime intra-op threads
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl ModelArgs {
    fn detector(&self) -> Result<FaceDetector> {
        let path = self.model_dir.join(&self.detector_model);
        FaceDetector::load(&path, self.threads, DetectorConfig::default())
            .with_context(|| format!("failed to load detector from {}", path.display()))
    }

    fn recognizer(&self) -> Result<FaceRecognizer> {
        let path = self.model_dir.join(&self.recognizer_model);
        FaceRecognizer::load(&path, self.threads, RecognizerConfig::default())
            .with_context(|| format!("failed to load recognizer from {}", path.display()))
    }
}

#[derive(Args)]
struct BusArgs {
    /// Talk to facelockd on the system bus instead of the session bus
    #[arg(long)]
    system: bool,
}

impl BusArgs {
    async fn proxy(&self) -> Result<FacelockProxy<'static>> {
        let conn = if self.system {
            zbus::Connection::system().await
        } else {
            zbus::Connection::session().await
        }
        .context("failed to connect to D-Bus")?;
        Ok(FacelockProxy::new(&conn).await?)
    }
}

#[zbus::proxy(
    interface = "org.facelock.Inference1",
    default_service = "org.facelock.Inference1",
    default_path = "/org/facelock/Inference1"
)]
trait Facelock {
    async fn detect_faces(
        &self,
        image: &[u8],
        format: &str,
        width: u32,
        height: u32,
        channels: u32,
        confidence_threshold: f64,
        nms_threshold: f64,
    ) -> zbus::Result<String>;

    async fn health(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Detect {
            image,
            confidence,
            nms,
            remote,
            bus,
            models,
        } => {
            let rgb = open_rgb(&image)?;
            if remote {
                let proxy = bus.proxy().await?;
                // Non-positive thresholds select the daemon's defaults.
                let reply = proxy
                    .detect_faces(
                        rgb.as_raw(),
                        "raw",
                        rgb.width(),
                        rgb.height(),
                        3,
                        confidence.unwrap_or(0.0) as f64,
                        nms.unwrap_or(0.0) as f64,
                    )
                    .await?;
                println!("{reply}");
            } else {
                let detections = models.detector()?.detect(&rgb, confidence, nms)?;
                println!("{}", serde_json::to_string_pretty(&detections)?);
            }
        }
        Commands::Embed { image, models } => {
            let rgb = open_rgb(&image)?;
            let embedding = embed_best_face(&models.detector()?, &models.recognizer()?, &rgb)
                .with_context(|| image.display().to_string())?;
            println!("{}", serde_json::to_string_pretty(&embedding)?);
        }
        Commands::Compare {
            first,
            second,
            models,
        } => {
            let detector = models.detector()?;
            let recognizer = models.recognizer()?;
            let a = embed_best_face(&detector, &recognizer, &open_rgb(&first)?)
                .with_context(|| first.display().to_string())?;
            let b = embed_best_face(&detector, &recognizer, &open_rgb(&second)?)
                .with_context(|| second.display().to_string())?;
            println!(
                "{}",
                serde_json::json!({
                    "similarity": a.similarity(&b),
                    "distance": a.euclidean_distance(&b),
                })
            );
        }
        Commands::Health { bus } => {
            let proxy = bus.proxy().await?;
            println!("{}", proxy.health().await?);
        }
    }

    Ok(())
}

fn open_rgb(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(img.to_rgb8())
}

/// Pick the most confident face. Detections are already sorted by confidence.
fn best_face(detections: &[Detection]) -> Result<&Detection> {
    match detections.first() {
        Some(face) => Ok(face),
        None => bail!("no face detected"),
    }
}

fn embed_best_face(
    detector: &FaceDetector,
    recognizer: &FaceRecognizer,
    image: &RgbImage,
) -> Result<Embedding> {
    let detections = detector.detect(image, None, None)?;
    let face = best_face(&detections)?;
    tracing::debug!(
        confidence = face.confidence,
        faces = detections.len(),
        "embedding most confident face"
    );
    Ok(recognizer.extract_embedding(image, &face.landmarks)?)
}
