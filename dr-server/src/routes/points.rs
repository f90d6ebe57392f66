use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use dr_engine::model::RecoveryPoint;
use dr_engine::retention::PruneResult;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_points))
        .route("/prune", post(prune_points))
        .route("/{id}", delete(delete_point))
}

async fn list_points(State(state): State<Arc<AppState>>) -> Result<Json<Vec<RecoveryPoint>>, AppError> {
    Ok(Json(state.engine.store().list().await?))
}

async fn delete_point(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PruneResult>, AppError> {
    let result = state.engine.retention().remove_point(&id).await?;
    Ok(Json(result))
}

async fn prune_points(State(state): State<Arc<AppState>>) -> Result<Json<PruneResult>, AppError> {
    let policy = state.engine.retention_policy();
    let result = state.engine.retention().prune(&policy).await?;
    Ok(Json(result))
}
