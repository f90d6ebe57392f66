use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let db = state.db.clone();
    let db_ok = tokio::task::spawn_blocking(move || {
        db.get()
            .map(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok())
            .unwrap_or(false)
    })
    .await?;

    let latest = state.engine.store().latest_verified().await?;
    let hours_since_verified = latest
        .as_ref()
        .map(|p| (chrono::Utc::now() - p.created_at).num_minutes() as f64 / 60.0);
    let rpo_hours = state.engine.config().objectives.rpo_hours;

    Ok(Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "node_id": state.engine.config().node_id,
        "database": db_ok,
        "latest_verified_point": latest.map(|p| p.backup_id),
        "hours_since_verified": hours_since_verified,
        "rpo_met": hours_since_verified.map(|h| h <= rpo_hours).unwrap_or(false),
        "active": state.active_operations(),
    })))
}
