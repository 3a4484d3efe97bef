use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use shipgate_core::controller::DeploymentView;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/stories/{story}/deployment
pub async fn get_deployment(
    State(app): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<DeploymentView>, AppError> {
    let session = app.session(&story).await?;
    Ok(Json(session.controller().snapshot().await))
}

/// POST /api/stories/{story}/checklist/{item}/toggle
///
/// Unknown items and toggles outside the gating phases leave the checklist
/// untouched; `changed` says which happened.
pub async fn toggle_item(
    State(app): State<AppState>,
    Path((story, item)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = app.session(&story).await?;
    let changed = session.controller().toggle(&item).await?;
    let view = session.controller().snapshot().await;
    Ok(Json(serde_json::json!({ "changed": changed, "deployment": view })))
}

#[derive(Deserialize)]
pub struct SetItemBody {
    pub done: bool,
}

/// PUT /api/stories/{story}/checklist/{item}
pub async fn set_item(
    State(app): State<AppState>,
    Path((story, item)): Path<(String, String)>,
    Json(body): Json<SetItemBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = app.session(&story).await?;
    let changed = session.controller().set_done(&item, body.done).await?;
    let view = session.controller().snapshot().await;
    Ok(Json(serde_json::json!({ "changed": changed, "deployment": view })))
}

/// POST /api/stories/{story}/deployment/start
///
/// Returns once the upstream has acknowledged the submission; polling
/// continues in the background and shows up in the deployment view.
pub async fn start_deployment(
    State(app): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = app.session(&story).await?;
    let handle = session.controller().start().await?;
    let view = session.controller().snapshot().await;
    Ok(Json(serde_json::json!({ "run_id": handle, "deployment": view })))
}

/// POST /api/stories/{story}/deployment/rearm
pub async fn rearm_deployment(
    State(app): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<DeploymentView>, AppError> {
    let session = app.session(&story).await?;
    session.controller().rearm().await?;
    Ok(Json(session.controller().snapshot().await))
}
