use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::models::workspace::WorkspaceSettings;
use crate::store;

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceBody {
    pub id: String,
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub settings: WorkspaceSettings,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// POST /api/v1/workspaces — register a tenant and provision its
/// analytics database.
pub async fn create_workspace(
    State(state): State<AppState>,
    Json(body): Json<CreateWorkspaceBody>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let workspace = state
        .config_db
        .create_workspace(&body.id, &body.name, &body.timezone, &body.settings)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    store::ensure_workspace_schema(&state.ch, &workspace.id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((StatusCode::CREATED, Json(workspace)))
}

/// GET /api/v1/workspaces/{id}
pub async fn get_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let workspace = state
        .config_db
        .get_workspace(&workspace_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("workspace {workspace_id} not found"),
            )
        })?;
    Ok(Json(workspace))
}
