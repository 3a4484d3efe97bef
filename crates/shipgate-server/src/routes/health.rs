use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/health: this server's liveness plus the upstream's health.
///
/// Always 200: an unreachable upstream is reported in the body, not as a
/// failure of this process.
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    let upstream = match app.service.health().await {
        Ok(payload) => serde_json::json!({ "ok": true, "health": payload }),
        Err(e) => serde_json::json!({ "ok": false, "error": e.to_string() }),
    };
    let open_sessions = app.sessions.lock().await.len();
    Json(serde_json::json!({
        "status": "ok",
        "api_base": app.service.base_url().as_str(),
        "open_sessions": open_sessions,
        "upstream": upstream,
    }))
}
