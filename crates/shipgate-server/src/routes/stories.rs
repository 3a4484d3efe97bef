use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use shipgate_core::service::StoryService;
use shipgate_core::story::{ImpactReport, NewStory, StorySummary, TestResultsReport};

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/stories
pub async fn list_stories(
    State(app): State<AppState>,
) -> Result<Json<Vec<StorySummary>>, AppError> {
    Ok(Json(app.service.list_stories().await?))
}

/// POST /api/stories: create a story upstream. Answers 201 with the story.
pub async fn add_story(
    State(app): State<AppState>,
    Json(story): Json<NewStory>,
) -> Result<(StatusCode, Json<NewStory>), AppError> {
    story.validate()?;
    app.service.add_story(&story).await?;
    tracing::info!(story = %story.story_number, "story added");
    Ok((StatusCode::CREATED, Json(story)))
}

/// GET /api/stories/{story}/impact
pub async fn get_impact(
    State(app): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<ImpactReport>, AppError> {
    Ok(Json(app.service.impact(&story).await?))
}

/// GET /api/stories/{story}/results: the upstream's aggregate results, with
/// the derived success rate.
pub async fn get_results(
    State(app): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report: TestResultsReport = app.service.test_results(&story).await?;
    Ok(Json(serde_json::json!({
        "story_id": story,
        "success_rate": report.success_rate(),
        "results": report,
    })))
}
