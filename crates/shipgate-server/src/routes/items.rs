use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use shipgate_core::types::ItemKind;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/stories/{story}/tests: item states plus the results summary.
pub async fn list_items(
    State(app): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = app.session(&story).await?;
    let registry = session.registry();
    Ok(Json(serde_json::json!({
        "story_id": story,
        "items": registry.snapshot().await,
        "summary": registry.summary().await,
    })))
}

/// POST /api/stories/{story}/tests/{kind}/{item}/run
///
/// 202 once the run is dispatched; the outcome arrives as an
/// `item_finished` event and in the item listing. 409 while the same item
/// is still running.
pub async fn run_item(
    State(app): State<AppState>,
    Path((story, kind, item)): Path<(String, String, String)>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let kind: ItemKind = kind.parse()?;
    if item.trim().is_empty() {
        return Err(AppError::bad_request("item id must not be empty"));
    }
    let session = app.session(&story).await?;
    // The run owns its task; dropping the join handle does not cancel it.
    let _run = session.registry().run(kind, &item).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "story_id": story,
            "kind": kind,
            "item_id": item,
            "status": "running",
        })),
    ))
}
