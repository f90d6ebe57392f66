use crate::error::AppError;
use crate::services::operations;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use dr_engine::model::DrillResult;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_drills).post(start_drill))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub range: Option<String>,
}

async fn list_drills(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DrillResult>>, AppError> {
    let to = chrono::Utc::now();
    let from = to - super::window(query.range.as_deref())?;
    let mut drills = state.engine.store().drills_between(from, to).await?;
    drills.reverse();
    Ok(Json(drills))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartDrillRequest {
    pub backup_id: Option<String>,
}

async fn start_drill(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartDrillRequest>>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let backup_id = operations::spawn_drill(&state, body.backup_id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "started": true, "backup_id": backup_id }))))
}
