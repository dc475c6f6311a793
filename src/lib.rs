pub mod api;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod session;
pub mod settings;
pub mod store;
pub mod tracking;
pub mod utils;
pub mod vision;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use db::Database;
use metrics::MetricsCollector;
use session::SessionLifecycle;
use settings::ServerSettings;
use store::{spawn_purge_task, SessionStore};
use tracking::TrackingController;
use vision::GazeEstimator;

/// Shared handles passed to every request and stream.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: SessionLifecycle,
    pub store: SessionStore,
    pub tracking: TrackingController,
    pub metrics: MetricsCollector,
    pub estimator: Arc<GazeEstimator>,
    pub settings: Arc<ServerSettings>,
}

impl AppState {
    pub fn new(settings: ServerSettings, db: Database) -> Self {
        let store = SessionStore::new(db);
        Self {
            lifecycle: SessionLifecycle::new(store.clone()),
            store,
            tracking: TrackingController::new(),
            metrics: MetricsCollector::new(),
            estimator: Arc::new(GazeEstimator::with_builtin(&settings.detector)),
            settings: Arc::new(settings),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let settings = ServerSettings::load()?;

    // Initialize logging (reads RUST_LOG env var)
    let level = if settings.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    info!("LeFocus server starting up...");

    let database = Database::new(settings.database_path.clone())?;
    let bind_addr = settings.bind_addr.clone();
    let purge_every = Duration::from_secs(settings.purge_interval_secs.max(1));
    let state = AppState::new(settings, database);

    let shutdown = CancellationToken::new();
    let purge = spawn_purge_task(state.store.clone(), purge_every, shutdown.child_token());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    let tracking = state.tracking.clone();
    axum::serve(listener, api::create_router(state))
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Shutdown requested");
            tracking.shutdown();
            shutdown.cancel();
        })
        .await
        .context("server terminated with an error")?;

    purge.await.context("purge task failed to join")?;
    info!("LeFocus server stopped");
    Ok(())
}
