use anyhow::{Context, Result};
use rollcall_core::{Config, DemoMatcher, EuclideanMatcher, Matcher};
use rollcall_store::Store;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod daemon;
mod dbus_interface;
mod engine;
mod recognition;

use daemon::Daemon;
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        interval_secs = config.scan_interval_secs,
        subjects = config.subjects.len(),
        "configuration loaded"
    );

    let store = Store::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    let encoder = rollcall_core::load_encoder(&config).context("failed to load face model")?;
    let matcher: Box<dyn Matcher + Send + Sync> = if rollcall_core::is_demo(encoder.as_ref()) {
        tracing::warn!("demo encoder in use: matches are random");
        Box::new(DemoMatcher::new())
    } else {
        Box::new(EuclideanMatcher)
    };

    let source = rollcall_hw::open_source(&config.camera_device)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    let engine = engine::spawn_engine(source, encoder, config.warmup_frames)?;
    tracing::info!(source = engine.source(), encoder = engine.encoder(), "engine ready");

    let daemon = Arc::new(Daemon::new(config, store, engine, matcher));
    let service = AttendanceService {
        daemon: daemon.clone(),
    };

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    if daemon.stop_recognition().await {
        tracing::info!("recognition loop stopped");
    }

    Ok(())
}
