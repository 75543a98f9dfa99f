use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::backfill_service::StartBackfillRequest;

#[derive(Debug, Deserialize)]
pub struct CreateBackfillBody {
    pub workspace_id: String,
    pub lookback_days: u32,
    #[serde(default)]
    pub chunk_size_days: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
}

/// POST /api/v1/backfills — start a backfill; 409 when one is active.
pub async fn start_backfill(
    State(state): State<AppState>,
    Json(body): Json<CreateBackfillBody>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let task_id = state
        .backfill
        .start_backfill(
            &body.workspace_id,
            StartBackfillRequest {
                lookback_days: body.lookback_days,
                chunk_size_days: body.chunk_size_days,
                batch_size: body.batch_size,
            },
        )
        .await
        .map_err(|e| (e.status_code(), e.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "task_id": task_id })),
    ))
}

/// GET /api/v1/backfills/{task_id}
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let progress = state
        .backfill
        .get_task_status(&task_id)
        .await
        .map_err(|e| (e.status_code(), e.to_string()))?;
    Ok(Json(progress))
}

/// POST /api/v1/backfills/{task_id}/cancel — 400 when already terminal.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .backfill
        .cancel_task(&task_id)
        .await
        .map_err(|e| (e.status_code(), e.to_string()))?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// GET /api/v1/workspaces/{id}/backfills — newest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tasks = state
        .backfill
        .list_tasks(&workspace_id)
        .await
        .map_err(|e| (e.status_code(), e.to_string()))?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

/// GET /api/v1/workspaces/{id}/backfill-summary
pub async fn get_summary(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let summary = state
        .backfill
        .get_backfill_summary(&workspace_id)
        .await
        .map_err(|e| (e.status_code(), e.to_string()))?;
    Ok(Json(summary))
}
