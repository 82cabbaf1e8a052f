//! sift-triage - Photo triage microservice
//!
//! **Module Identity:**
//! - Name: sift-triage
//! - Port: 5780 (default)
//!
//! Narrows large photo sets to a target selection by showing labelled grids
//! of thumbnails to remote vision models, and optionally scores the result.

use anyhow::{Context, Result};
use clap::Parser;
use sift_common::config::{RootFolderInitializer, RootFolderResolver};
use sift_common::events::EventBus;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sift_triage::config::{resolve_vision_api_key, resolve_vision_endpoint};
use sift_triage::db::settings::TriageSettings;
use sift_triage::services::vision_client::HttpVisionClient;
use sift_triage::services::{job_cleanup, job_runner};
use sift_triage::AppState;

const MODULE_NAME: &str = "sift-triage";

/// Expired jobs are collected this often
const CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Parser, Debug)]
#[command(name = "sift-triage", version, about = "PhotoSift grid triage service")]
struct Args {
    /// HTTP port
    #[arg(short, long, default_value = "5780", env = "SIFT_PORT")]
    port: u16,

    /// Root folder holding the database and job staging directories
    #[arg(short, long, env = "SIFT_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = RootFolderResolver::new(MODULE_NAME).with_cli_arg(args.root_folder.clone());
    let toml_config = resolver.load_toml();

    // RUST_LOG wins over the TOML [logging] level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = &toml_config.logging.level;
                tracing_subscriber::EnvFilter::new(format!(
                    "sift_triage={level},sift_common={level},tower_http=info"
                ))
            }),
        )
        .with_target(true)
        .init();

    info!("Starting sift-triage (Photo Triage) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Build: {} ({})", env!("GIT_HASH"), env!("BUILD_PROFILE"));

    let root_folder = resolver.resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = sift_triage::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Fail fast on bad tunables rather than at the first job
    let settings = TriageSettings::load(&db_pool)
        .await
        .context("Invalid triage settings")?;

    let jobs_root = initializer.jobs_path();
    tokio::fs::create_dir_all(&jobs_root)
        .await
        .with_context(|| format!("Failed to create jobs folder {}", jobs_root.display()))?;

    let event_bus = EventBus::new(100);
    let mut state = AppState::new(db_pool.clone(), event_bus, jobs_root.clone());

    match resolve_vision_api_key(&db_pool, &toml_config).await {
        Ok(api_key) => {
            let endpoint = resolve_vision_endpoint(&toml_config);
            info!("Vision endpoint: {}", endpoint);
            let client =
                HttpVisionClient::new(endpoint, api_key, settings.model_call_timeout())?;
            state = state.with_vision_model(Arc::new(client));
        }
        Err(e) => {
            warn!("Vision model unavailable, triage jobs will be rejected: {}", e);
        }
    }

    if state.vision_model.is_some() {
        let resumed = job_runner::resume_interrupted_jobs(&state).await?;
        if resumed > 0 {
            info!("Resumed {} interrupted triage job(s)", resumed);
        }
    }

    let shutdown = CancellationToken::new();
    let cleanup = job_cleanup::spawn_cleanup_task(
        db_pool,
        jobs_root,
        CLEANUP_INTERVAL,
        shutdown.clone(),
    );

    let app = sift_triage::build_router(state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // Running jobs stay non-terminal and resume on next start
    shutdown.cancel();
    let _ = cleanup.await;
    info!("sift-triage stopped");

    Ok(())
}
