use anyhow::{bail, Context, Result};
use rollcall_core::{templates, AttendanceService, KnownTemplate, SqliteStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;

use config::Config;
use dbus_interface::AttendanceBus;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        templates = %config.templates_path.display(),
        models = %config.model_dir.display(),
        tolerance = config.match_tolerance,
        "configuration loaded"
    );

    let known = templates::load_templates(&config.templates_path)
        .with_context(|| format!("loading templates from {}", config.templates_path.display()))?;
    check_template_dims(&known, rollcall_vision::EMBEDDING_DIM)?;

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening ledger at {}", config.db_path.display()))?;

    let engine = rollcall_vision::spawn_engine(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
    )
    .context("starting face engine")?;

    let service = Arc::new(AttendanceService::new(
        known,
        store,
        engine,
        config.settings(),
    ));

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceBus::new(service))?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(
        bus = if config.session_bus { "session" } else { "system" },
        name = BUS_NAME,
        "rollcalld ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}

/// Templates must have the analyzer's embedding width, or no face can match.
fn check_template_dims(known: &[KnownTemplate], expected: usize) -> Result<()> {
    let Some(first) = known.first() else {
        tracing::warn!("no known templates; every face will be reported as unknown");
        return Ok(());
    };
    if first.embedding.len() != expected {
        bail!(
            "templates have {}-dim embeddings but the face model produces {expected}-dim; \
             regenerate them with the same model",
            first.embedding.len()
        );
    }
    Ok(())
}
