use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use dr_engine::report::{Report, TimeRange};
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/", get(generate_report))
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub range: Option<String>,
}

async fn generate_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Report>, AppError> {
    let range = match query.range.as_deref() {
        Some(raw) => raw.parse::<TimeRange>()?,
        None => TimeRange::default(),
    };
    let report = state.engine.reports().generate_report(range).await?;
    Ok(Json(report))
}
