pub mod backups;
pub mod drills;
pub mod health;
pub mod points;
pub mod recoveries;
pub mod reports;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health::health))
        .nest("/api/backups", backups::router(state.clone()))
        .nest("/api/points", points::router(state.clone()))
        .nest("/api/recoveries", recoveries::router(state.clone()))
        .nest("/api/drills", drills::router(state.clone()))
        .nest("/api/reports", reports::router(state.clone()))
        .route("/ws", axum::routing::get(crate::ws::ui::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Default reporting window for list endpoints.
pub(crate) fn window(range: Option<&str>) -> Result<chrono::Duration, crate::error::AppError> {
    let range: dr_engine::report::TimeRange = range.unwrap_or("30d").parse()?;
    Ok(range.duration())
}
