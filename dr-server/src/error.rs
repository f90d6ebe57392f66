use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dr_engine::DrError;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<DrError> for AppError {
    fn from(e: DrError) -> Self {
        match e {
            DrError::NoRecoveryPointAvailable | DrError::RecoveryPointNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            DrError::BackupInProgress(_) | DrError::RetentionInvariantViolation(_) => {
                AppError::Conflict(e.to_string())
            }
            DrError::Config(_) => AppError::BadRequest(e.to_string()),
            DrError::Http(_) | DrError::Storage(_) => AppError::ServiceUnavailable(e.to_string()),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
