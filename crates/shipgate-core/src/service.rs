//! Seams to the external story/analysis service.
//!
//! The controllers only ever talk to these traits. `shipgate-client` provides
//! the HTTP implementation; tests provide in-memory fakes.

use async_trait::async_trait;

use crate::error::{ItemRunError, PollError, ServiceError, SubmitError};
use crate::story::{
    DeploymentPlan, ImpactReport, MigrationPlan, NewStory, StorySummary, TestResultsReport,
};
use crate::types::{ActionRequest, ActionRun, ChecklistItem, ItemKind, RunHandle, TestOutcome};

/// Submits the gated action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Exactly one submission attempt, no implicit retry. On success the
    /// upstream starts the action out-of-band and this returns immediately.
    async fn submit(&self, request: &ActionRequest) -> Result<RunHandle, SubmitError>;
}

/// One status round trip for a submitted run.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// `story_id` scopes the lookup; the handle alone identifies the run.
    async fn action_status(
        &self,
        story_id: &str,
        handle: &RunHandle,
    ) -> Result<ActionRun, PollError>;
}

/// Executes single test or validation items.
#[async_trait]
pub trait ItemRunner: Send + Sync {
    /// `test_name` is the case text as the upstream plan words it.
    async fn run_test_item(&self, story_id: &str, test_name: &str)
        -> Result<TestOutcome, ItemRunError>;

    async fn validate_migration_risk(
        &self,
        story_id: &str,
        risk_id: &str,
    ) -> Result<TestOutcome, ItemRunError>;

    /// Dispatch on the item family. Test and edge cases are sent by their
    /// label when one is known; migration risks always go by id.
    async fn run_item(
        &self,
        story_id: &str,
        kind: ItemKind,
        item_id: &str,
        label: Option<&str>,
    ) -> Result<TestOutcome, ItemRunError> {
        match kind {
            ItemKind::TestCase | ItemKind::EdgeCase => {
                self.run_test_item(story_id, label.unwrap_or(item_id)).await
            }
            ItemKind::MigrationRisk => self.validate_migration_risk(story_id, item_id).await,
        }
    }
}

/// Read side of the story/analysis service.
#[async_trait]
pub trait StoryService: Send + Sync {
    async fn list_stories(&self) -> Result<Vec<StorySummary>, ServiceError>;

    async fn impact(&self, story_id: &str) -> Result<ImpactReport, ServiceError>;

    async fn deployment_plan(&self, story_id: &str) -> Result<DeploymentPlan, ServiceError>;

    async fn migration_plan(&self, story_id: &str) -> Result<MigrationPlan, ServiceError>;

    async fn add_story(&self, story: &NewStory) -> Result<(), ServiceError>;

    /// Aggregate results the test service has recorded for a story.
    async fn test_results(&self, story_id: &str) -> Result<TestResultsReport, ServiceError>;

    /// The gate items for a story, derived from its deployment plan.
    async fn checklist(&self, story_id: &str) -> Result<Vec<ChecklistItem>, ServiceError> {
        Ok(self.deployment_plan(story_id).await?.checklist_items())
    }
}

/// Everything a story session needs from upstream, behind one object.
pub trait AnalysisService: StoryService + ActionExecutor + StatusSource + ItemRunner {}

impl<T> AnalysisService for T where T: StoryService + ActionExecutor + StatusSource + ItemRunner {}
