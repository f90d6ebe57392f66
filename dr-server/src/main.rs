mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;
mod state;
mod ws;

use crate::config::AppConfig;
use crate::db::connection::create_pool;
use crate::db::migrate::migrate;
use crate::db::point_store::SqlitePointStore;
use crate::services::backup_scheduler::BackupScheduler;
use crate::state::AppState;
use crate::ws::ui::UiBroadcaster;
use dr_engine::notify::{FanoutNotifier, Notifier};
use dr_engine::{Collaborators, Engine};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Daily at 03:00 UTC, after the default 02:00 backup.
const PRUNE_CRON: &str = "0 0 3 * * *";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tracing::info!("Starting dr-server on port {}", config.port);

    // Ensure data directories exist
    std::fs::create_dir_all(&config.data_dir)?;

    // Initialize database
    let db_path = config.db_path.to_string_lossy().to_string();
    let pool = create_pool(&db_path)?;
    migrate(&pool)?;

    // Engine over the SQLite registry, with WebSocket fan-out added to its notifiers
    let engine_config = config.load_engine_config()?;
    let ui = UiBroadcaster::new();
    let store = Arc::new(SqlitePointStore::new(pool.clone()));
    let deps = Collaborators::with_store(&engine_config, store)?;
    let notifier: Arc<dyn Notifier> = Arc::new(FanoutNotifier::new(vec![deps.notifier.clone(), Arc::new(ui.clone())]));
    let engine = Arc::new(Engine::new(engine_config, deps.with_notifier(notifier)).await?);

    // Build application state
    let state = Arc::new(AppState::new(pool, config.clone(), engine, ui));

    // Initialize cron scheduler
    let scheduler = match BackupScheduler::new(state.clone()).await {
        Ok(s) => {
            if let Some(cron) = config.schedule_cron(state.engine.config()) {
                if let Err(e) = s.schedule_backups(&cron).await {
                    tracing::warn!("Failed to schedule backups: {}", e);
                }
            }
            if let Err(e) = s.schedule_prune(PRUNE_CRON).await {
                tracing::warn!("Failed to schedule prune: {}", e);
            }
            if let Err(e) = s.start().await {
                tracing::warn!("Failed to start scheduler: {}", e);
            }
            Some(s)
        }
        Err(e) => {
            tracing::warn!("Failed to create scheduler: {}", e);
            None
        }
    };

    // Build router
    let app = routes::create_router(state.clone());

    // Start HTTP server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await?;

    // Cleanup; cancelling the parent token stops running jobs
    tracing::info!("Shutting down...");
    state.shutdown.cancel();

    // Stop scheduler
    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!("Scheduler shutdown error: {}", e);
        }
    }

    // Close database
    db::connection::close_pool(&state.db);
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
