use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod image_input;

use config::{BusKind, Config};

const BUS_NAME: &str = "org.facelock.Inference1";
const OBJECT_PATH: &str = "/org/facelock/Inference1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facelockd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        input_size = config.detector.input_size,
        confidence_threshold = config.detector.confidence_threshold,
        nms_threshold = config.detector.nms_threshold,
        intra_threads = config.intra_threads,
        bus = ?config.bus,
        "configuration loaded"
    );

    let engine = engine::EngineHandle::load(&config).context("failed to load models")?;
    let service = dbus_interface::FacelockService::new(engine);

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "facelockd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facelockd shutting down");

    Ok(())
}
