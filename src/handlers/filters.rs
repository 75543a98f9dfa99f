use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::filters::version::compute_filter_version;
use crate::models::filter::FilterDefinition;

/// GET /api/v1/workspaces/{id}/filters
pub async fn get_filters(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let filters = state
        .filters
        .get_filters(&workspace_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("workspace {workspace_id} not found"),
            )
        })?;
    let version = compute_filter_version(&filters);
    Ok(Json(serde_json::json!({ "filters": filters, "version": version })))
}

/// PUT /api/v1/workspaces/{id}/filters — replace the full list. Emits
/// filters.changed, which invalidates the ingest-side workspace cache.
pub async fn replace_filters(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Json(filters): Json<Vec<FilterDefinition>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let saved = state
        .filters
        .replace_filters(&workspace_id, filters)
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("not found") {
                (StatusCode::NOT_FOUND, msg)
            } else {
                (StatusCode::BAD_REQUEST, msg)
            }
        })?;
    let version = compute_filter_version(&saved);
    Ok(Json(serde_json::json!({ "filters": saved, "version": version })))
}
