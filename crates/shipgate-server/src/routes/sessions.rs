use axum::extract::{Path, State};
use axum::Json;
use shipgate_core::session::StorySession;

use crate::error::AppError;
use crate::state::AppState;

/// Everything a freshly opened story shows: its deployment and its tests.
pub(crate) async fn session_json(session: &StorySession) -> serde_json::Value {
    serde_json::json!({
        "story_id": session.story_id(),
        "opened_at": session.opened_at(),
        "deployment": session.controller().snapshot().await,
        "tests": session.registry().snapshot().await,
        "summary": session.registry().summary().await,
    })
}

/// POST /api/stories/{story}/session: open (or reopen) a story.
pub async fn open_session(
    State(app): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = app.open_session(&story).await?;
    Ok(Json(session_json(&session).await))
}

/// GET /api/stories/{story}/session
pub async fn get_session(
    State(app): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = app.session(&story).await?;
    Ok(Json(session_json(&session).await))
}

/// DELETE /api/stories/{story}/session
pub async fn close_session(
    State(app): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !app.close_session(&story).await {
        return Err(AppError::not_found(format!(
            "no open session for story '{story}'"
        )));
    }
    Ok(Json(serde_json::json!({ "closed": story })))
}
