use crate::error::AppError;
use crate::services::operations;
use crate::state::{AppState, Operation};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use dr_engine::integrity::VerificationResult;
use dr_engine::model::{BackupJob, Domain};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(start_backup))
        .route("/cancel", post(cancel_backup))
        .route("/{id}", get(get_backup))
        .route("/{id}/verify", post(verify_backup))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub range: Option<String>,
}

/// Newest first.
async fn list_backups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BackupJob>>, AppError> {
    let to = chrono::Utc::now();
    let from = to - super::window(query.range.as_deref())?;
    let mut jobs = state.engine.store().backups_between(from, to).await?;
    jobs.reverse();
    Ok(Json(jobs))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupJob>, AppError> {
    match state.engine.store().get_backup(&id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(AppError::NotFound("Backup not found".into())),
    }
}

/// Every field is optional; unset toggles fall back to the engine's pipeline config.
#[derive(Debug, Default, Deserialize)]
pub struct StartBackupRequest {
    #[serde(default)]
    pub domains: Vec<Domain>,
    pub compression: Option<bool>,
    pub encryption: Option<bool>,
    pub remote_upload: Option<bool>,
    pub verification: Option<bool>,
}

async fn start_backup(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartBackupRequest>>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let mut options = state.engine.default_options();
    if let Some(v) = body.compression {
        options.compression = v;
    }
    if let Some(v) = body.encryption {
        options.encryption = v;
    }
    if let Some(v) = body.remote_upload {
        options.remote_upload = v;
    }
    if let Some(v) = body.verification {
        options.verification = v;
    }

    operations::spawn_backup(&state, body.domains, options)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "started": true, "options": options }))))
}

async fn cancel_backup(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    if !state.cancel(Operation::Backup) {
        return Err(AppError::NotFound("No backup is running".into()));
    }
    Ok(Json(json!({ "cancelled": true })))
}

async fn verify_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<VerificationResult>, AppError> {
    if state.engine.store().get(&id).await?.is_none() {
        return Err(AppError::NotFound("Recovery point not found".into()));
    }
    let result = state.engine.backups().reverify(&id).await?;
    Ok(Json(result))
}
