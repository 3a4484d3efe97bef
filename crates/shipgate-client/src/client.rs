use async_trait::async_trait;
use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use shipgate_core::config::Config;
use shipgate_core::error::{ItemRunError, PollError, ServiceError, SubmitError};
use shipgate_core::service::{ActionExecutor, ItemRunner, StatusSource, StoryService};
use shipgate_core::story::{
    DeploymentPlan, ImpactReport, MigrationPlan, NewStory, StorySummary, TestResultsReport,
};
use shipgate_core::types::{ActionRequest, ActionRun, RunHandle, TestOutcome};

use crate::error::ClientError;
use crate::types::{
    DeploymentStatusResponse, ItemOutcomeResponse, RunTestBody, StartDeploymentBody,
    StartDeploymentResponse, ValidateMigrationBody,
};

// ─── ClientConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the story/analysis API, e.g. `http://localhost:8000`.
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Per-request budget, including reading the body.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.api_base.clone(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }
}

// ─── HttpStoryService ─────────────────────────────────────────────────────

/// Implements every collaborator trait of `shipgate-core` over the
/// story/analysis HTTP API.
///
/// Each call is exactly one request; retries are left to the caller.
#[derive(Debug, Clone)]
pub struct HttpStoryService {
    base: Url,
    http: reqwest::Client,
}

impl HttpStoryService {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&config.base_url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https") && !u.cannot_be_a_base())
            .ok_or_else(|| ClientError::InvalidBase(config.base_url.clone()))?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `GET /health`: the upstream's own health payload.
    pub async fn health(&self) -> Result<serde_json::Value, ServiceError> {
        self.get_json(self.endpoint(&["health"]), "health").await
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Checked at construction: the base can always take path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T, ServiceError> {
        debug!(%url, "GET");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::Unreachable(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }

    async fn post_item<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
        item_id: &str,
    ) -> Result<TestOutcome, ItemRunError> {
        debug!(%url, item = item_id, "POST");
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ItemRunError::Unreachable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ItemRunError::Rejected(format!("HTTP {}: {body}", status.as_u16())));
        }
        let outcome: ItemOutcomeResponse = resp
            .json()
            .await
            .map_err(|e| ItemRunError::Decode(e.to_string()))?;
        Ok(TestOutcome {
            item_id: item_id.to_string(),
            status: outcome.status,
            message: outcome.message,
            error: outcome.error,
        })
    }
}

// ─── StoryService ─────────────────────────────────────────────────────────

#[async_trait]
impl StoryService for HttpStoryService {
    async fn list_stories(&self) -> Result<Vec<StorySummary>, ServiceError> {
        self.get_json(self.endpoint(&["stories"]), "stories").await
    }

    async fn impact(&self, story_id: &str) -> Result<ImpactReport, ServiceError> {
        self.get_json(self.endpoint(&["impact", story_id]), story_id)
            .await
    }

    async fn deployment_plan(&self, story_id: &str) -> Result<DeploymentPlan, ServiceError> {
        self.get_json(self.endpoint(&["testing", story_id, "deployment"]), story_id)
            .await
    }

    async fn migration_plan(&self, story_id: &str) -> Result<MigrationPlan, ServiceError> {
        self.get_json(self.endpoint(&["testing", story_id, "migrations"]), story_id)
            .await
    }

    async fn add_story(&self, story: &NewStory) -> Result<(), ServiceError> {
        let url = self.endpoint(&["stories", "add"]);
        debug!(%url, story = %story.story_number, "POST");
        let resp = self
            .http
            .post(url)
            .json(story)
            .send()
            .await
            .map_err(|e| ServiceError::Unreachable(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(story = %story.story_number, status = status.as_u16(), "story creation refused");
        if status.is_client_error() {
            return Err(ServiceError::Rejected(error_detail(&body)));
        }
        Err(ServiceError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn test_results(&self, story_id: &str) -> Result<TestResultsReport, ServiceError> {
        self.get_json(self.endpoint(&["testing", story_id, "results"]), story_id)
            .await
    }
}

/// The `detail` message of an error body, or the raw body when it has none.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

// ─── ActionExecutor ───────────────────────────────────────────────────────

#[async_trait]
impl ActionExecutor for HttpStoryService {
    async fn submit(&self, request: &ActionRequest) -> Result<RunHandle, SubmitError> {
        let url = self.endpoint(&["testing", request.story_id.as_str(), "start-deployment"]);
        let body = StartDeploymentBody {
            checklist: &request.checklist_snapshot,
            timestamp: request.submitted_at,
        };
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SubmitError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = if text.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                text
            };
            warn!(story = %request.story_id, status = status.as_u16(), "start-deployment refused");
            return Err(match status {
                StatusCode::NOT_FOUND => SubmitError::NotFound(request.story_id.clone()),
                StatusCode::CONFLICT => SubmitError::Conflict(detail),
                _ => SubmitError::Rejected(detail),
            });
        }

        let ack: StartDeploymentResponse = resp
            .json()
            .await
            .map_err(|e| SubmitError::Rejected(format!("unreadable acknowledgement: {e}")))?;
        Ok(RunHandle::new(ack.run_id))
    }
}

// ─── StatusSource ─────────────────────────────────────────────────────────

#[async_trait]
impl StatusSource for HttpStoryService {
    async fn action_status(
        &self,
        story_id: &str,
        handle: &RunHandle,
    ) -> Result<ActionRun, PollError> {
        let mut url = self.endpoint(&["testing", story_id, "deployment-status"]);
        url.query_pairs_mut().append_pair("run_id", handle.as_str());

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PollError::Unreachable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PollError::Http {
                status: status.as_u16(),
            });
        }
        let body: DeploymentStatusResponse = resp
            .json()
            .await
            .map_err(|e| PollError::Decode(e.to_string()))?;

        Ok(ActionRun {
            id: handle.clone(),
            story_id: story_id.to_string(),
            state: body.status,
            started_at: body.started_at,
            last_polled_at: Some(Utc::now()),
            result: body.result,
            error: body.error,
        })
    }
}

// ─── ItemRunner ───────────────────────────────────────────────────────────

#[async_trait]
impl ItemRunner for HttpStoryService {
    async fn run_test_item(
        &self,
        story_id: &str,
        test_name: &str,
    ) -> Result<TestOutcome, ItemRunError> {
        let url = self.endpoint(&["testing", story_id, "run"]);
        self.post_item(url, &RunTestBody { test_name }, test_name)
            .await
    }

    async fn validate_migration_risk(
        &self,
        story_id: &str,
        risk_id: &str,
    ) -> Result<TestOutcome, ItemRunError> {
        let url = self.endpoint(&["testing", story_id, "validate-migration"]);
        self.post_item(url, &ValidateMigrationBody { risk_id }, risk_id)
            .await
    }
}
