//! Request and response bodies of the story/analysis HTTP API.
//!
//! Only the deployment and item-run endpoints need their own shapes; the
//! read-side payloads deserialize straight into `shipgate_core::story`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipgate_core::types::{ChecklistSnapshot, RunState, TestStatus};

// ─── Deployment ───────────────────────────────────────────────────────────

/// Body of `POST /testing/{story}/start-deployment`.
#[derive(Debug, Serialize)]
pub struct StartDeploymentBody<'a> {
    pub checklist: &'a ChecklistSnapshot,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct StartDeploymentResponse {
    pub run_id: String,
}

/// Body of `GET /testing/{story}/deployment-status`.
#[derive(Debug, Deserialize)]
pub struct DeploymentStatusResponse {
    pub status: RunState,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

// ─── Item runs ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RunTestBody<'a> {
    pub test_name: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ValidateMigrationBody<'a> {
    pub risk_id: &'a str,
}

/// Outcome body shared by `/run` and `/validate-migration`.
#[derive(Debug, Deserialize)]
pub struct ItemOutcomeResponse {
    pub status: TestStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
