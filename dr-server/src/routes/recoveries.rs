use crate::error::AppError;
use crate::services::operations;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use dr_engine::adapters::RestoreTarget;
use dr_engine::model::{new_id, RecoveryJob, RecoveryScope};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_recoveries).post(start_recovery))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub range: Option<String>,
}

async fn list_recoveries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RecoveryJob>>, AppError> {
    let to = chrono::Utc::now();
    let from = to - super::window(query.range.as_deref())?;
    let mut jobs = state.engine.store().recoveries_between(from, to).await?;
    jobs.reverse();
    Ok(Json(jobs))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRecoveryRequest {
    /// Latest verified point when omitted
    pub backup_id: Option<String>,
    /// `"full"` or comma-separated domains
    pub scope: Option<String>,
    /// Restore into this directory instead of production
    pub sandbox_root: Option<PathBuf>,
}

async fn start_recovery(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartRecoveryRequest>>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let scope: RecoveryScope = body
        .scope
        .as_deref()
        .unwrap_or("full")
        .parse()
        .map_err(AppError::BadRequest)?;
    let target = match body.sandbox_root {
        Some(root) => RestoreTarget::Sandbox {
            id: new_id("sandbox"),
            root,
        },
        None => RestoreTarget::Production,
    };

    let target_name = target.to_string();
    let backup_id = operations::spawn_recovery(&state, body.backup_id, scope.clone(), target).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "started": true,
            "backup_id": backup_id,
            "scope": scope.to_string(),
            "target": target_name,
        })),
    ))
}
