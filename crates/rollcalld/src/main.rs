use anyhow::{Context, Result};
use rollcall_core::{LbphRecognizer, ScrfdDetector};
use rollcall_hw::FrameGrabber;
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod dbus_interface;
mod engine;
mod enrollment;
mod evacuation;
mod login;
mod schema;
mod store;
mod vision;

use config::Config;
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};
use engine::Engine;
use store::Database;
use vision::Vision;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load()?;
    tracing::info!(
        device = %config.camera_device,
        db = %config.db_path.display(),
        session_bus = config.session_bus,
        "configuration loaded"
    );

    let store = Database::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    let scrfd_path = config.scrfd_model_path();
    let detector = ScrfdDetector::load(&scrfd_path)?;
    tracing::info!(path = %scrfd_path, "SCRFD detector loaded");

    let mut vision = Vision::new(Box::new(detector), Box::new(LbphRecognizer::new()));
    let samples = vision.reload(&store)?;
    tracing::info!(samples, "recognizer ready");

    let grabber = FrameGrabber::new(
        &config.camera_device,
        config.frame_width,
        config.frame_height,
        config.poll_interval(),
    );
    let engine = Engine::new(&config, Box::new(grabber), vision, store);
    let handle = engine::spawn_engine(engine, config.poll_interval())?;

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, RollcallService::new(handle.clone()))?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");
    if let Err(e) = handle.stop().await {
        tracing::warn!(error = %e, "engine did not stop cleanly");
    }

    Ok(())
}
