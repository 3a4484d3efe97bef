//! One open story: its deployment controller and test registry, built
//! together on open and torn down together on close.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::controller::DeploymentController;
use crate::error::Result;
use crate::events::EventSender;
use crate::poll::PollPolicy;
use crate::registry::TestRunRegistry;
use crate::service::{AnalysisService, StoryService};

pub struct StorySession {
    story_id: String,
    opened_at: DateTime<Utc>,
    service: Arc<dyn StoryService>,
    controller: DeploymentController,
    registry: TestRunRegistry,
}

impl StorySession {
    /// Fetch the story's checklist and build its controller and registry.
    ///
    /// Fails only if the checklist cannot be loaded. Test and migration item
    /// lists are best effort; they can still be run by id when missing.
    pub async fn open<S>(
        story_id: impl Into<String>,
        service: Arc<S>,
        policy: PollPolicy,
        events: EventSender,
    ) -> Result<Self>
    where
        S: AnalysisService + 'static,
    {
        let story_id = story_id.into();
        let checklist = service.checklist(&story_id).await?;

        let controller = DeploymentController::new(
            story_id.clone(),
            service.clone(),
            service.clone(),
            policy,
            events.clone(),
        );
        controller.initialize_checklist(checklist).await?;

        let registry = TestRunRegistry::new(story_id.clone(), service.clone(), events);
        match service.impact(&story_id).await {
            Ok(report) => registry.register(report.test_items()).await,
            Err(e) => warn!(story = %story_id, error = %e, "no test items loaded"),
        }
        match service.migration_plan(&story_id).await {
            Ok(plan) => registry.register(plan.risk_items()).await,
            Err(e) => warn!(story = %story_id, error = %e, "no migration risks loaded"),
        }

        info!(story = %story_id, "story session opened");
        Ok(Self {
            story_id,
            opened_at: Utc::now(),
            service,
            controller,
            registry,
        })
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn controller(&self) -> &DeploymentController {
        &self.controller
    }

    pub fn registry(&self) -> &TestRunRegistry {
        &self.registry
    }

    /// Re-fetch the checklist, keeping the operator's marks for stable ids.
    pub async fn refresh_checklist(&self) -> Result<()> {
        let items = self.service.checklist(&self.story_id).await?;
        self.controller.reload_checklist(items).await?;
        Ok(())
    }

    pub async fn teardown(&self) {
        self.controller.teardown().await;
        self.registry.teardown().await;
        info!(story = %self.story_id, "story session closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Phase;
    use crate::error::{ItemRunError, PollError, ServiceError, ShipgateError, SubmitError};
    use crate::events;
    use crate::service::{ActionExecutor, ItemRunner, StatusSource};
    use crate::story::{
        DeploymentPlan, ImpactReport, MigrationPlan, MigrationRisk, NewStory, StorySummary,
        TestResultsReport, TestingPlan,
    };
    use crate::types::{ActionRequest, ActionRun, ItemKind, RunHandle, TestOutcome, TestStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeService {
        plan: Mutex<Option<DeploymentPlan>>,
    }

    impl FakeService {
        fn with_plan(items: &[&str], required: &[usize]) -> Arc<Self> {
            Arc::new(Self {
                plan: Mutex::new(Some(plan(items, required))),
            })
        }
    }

    fn plan(items: &[&str], required: &[usize]) -> DeploymentPlan {
        serde_json::from_value(serde_json::json!({
            "pre_deployment_checklist": items,
            "required_checklist_items": required,
        }))
        .unwrap()
    }

    #[async_trait]
    impl StoryService for FakeService {
        async fn list_stories(&self) -> std::result::Result<Vec<StorySummary>, ServiceError> {
            Ok(vec![])
        }

        async fn impact(&self, story_id: &str) -> std::result::Result<ImpactReport, ServiceError> {
            let mut report: ImpactReport =
                serde_json::from_value(serde_json::json!({ "story_number": story_id })).unwrap();
            report.testing_and_validation = Some(TestingPlan {
                critical_test_cases: vec!["login works".into()],
                edge_cases_to_validate: vec!["empty cart".into(), "expired token".into()],
                ..TestingPlan::default()
            });
            Ok(report)
        }

        async fn deployment_plan(
            &self,
            story_id: &str,
        ) -> std::result::Result<DeploymentPlan, ServiceError> {
            self.plan
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ServiceError::NotFound(story_id.to_string()))
        }

        async fn migration_plan(
            &self,
            _story_id: &str,
        ) -> std::result::Result<MigrationPlan, ServiceError> {
            Ok(MigrationPlan {
                existing_data_transformations: vec![MigrationRisk {
                    id: "risk-1".into(),
                    title: "Backfill".into(),
                    ..MigrationRisk::default()
                }],
                ..MigrationPlan::default()
            })
        }

        async fn add_story(&self, _story: &NewStory) -> std::result::Result<(), ServiceError> {
            Ok(())
        }

        async fn test_results(
            &self,
            _story_id: &str,
        ) -> std::result::Result<TestResultsReport, ServiceError> {
            Ok(TestResultsReport::default())
        }
    }

    #[async_trait]
    impl ActionExecutor for FakeService {
        async fn submit(
            &self,
            request: &ActionRequest,
        ) -> std::result::Result<RunHandle, SubmitError> {
            Ok(RunHandle::new(format!("{}-run", request.story_id)))
        }
    }

    #[async_trait]
    impl StatusSource for FakeService {
        async fn action_status(
            &self,
            story_id: &str,
            handle: &RunHandle,
        ) -> std::result::Result<ActionRun, PollError> {
            Ok(ActionRun::started(handle.clone(), story_id))
        }
    }

    #[async_trait]
    impl ItemRunner for FakeService {
        async fn run_test_item(
            &self,
            _story_id: &str,
            test_name: &str,
        ) -> std::result::Result<TestOutcome, ItemRunError> {
            Ok(TestOutcome {
                item_id: test_name.into(),
                status: TestStatus::Passed,
                message: None,
                error: None,
            })
        }

        async fn validate_migration_risk(
            &self,
            _story_id: &str,
            risk_id: &str,
        ) -> std::result::Result<TestOutcome, ItemRunError> {
            Ok(TestOutcome {
                item_id: risk_id.into(),
                status: TestStatus::Skipped,
                message: None,
                error: None,
            })
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy::fixed(Duration::from_millis(100), 10)
    }

    #[tokio::test]
    async fn open_loads_checklist_and_known_items() {
        let service = FakeService::with_plan(&["Flag on", "Backup taken"], &[1]);
        let session = StorySession::open("US-101", service, policy(), events::channel())
            .await
            .unwrap();

        let view = session.controller().snapshot().await;
        assert_eq!(view.phase, Phase::Gated);
        assert_eq!(view.blocking, vec!["pre-deploy-2".to_string()]);

        let items = session.registry().snapshot().await;
        let ids: Vec<&str> = items.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["test-case-1", "edge-case-1", "edge-case-2", "risk-1"]);
        let labels: Vec<Option<&str>> = items.iter().map(|i| i.label.as_deref()).collect();
        assert_eq!(
            labels,
            vec![Some("login works"), Some("empty cart"), Some("expired token"), Some("Backfill")]
        );
        assert_eq!(session.registry().summary().await.total, 4);
    }

    #[tokio::test]
    async fn open_fails_without_deployment_plan() {
        let service = Arc::new(FakeService {
            plan: Mutex::new(None),
        });
        let err = StorySession::open("US-404", service, policy(), events::channel())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ShipgateError::Service(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn refresh_keeps_marks_for_stable_ids() {
        let service = FakeService::with_plan(&["Flag on", "Backup taken"], &[0, 1]);
        let session = StorySession::open("US-101", service.clone(), policy(), events::channel())
            .await
            .unwrap();
        session.controller().toggle("pre-deploy-1").await.unwrap();

        *service.plan.lock().unwrap() = Some(plan(&["Flag on", "Backup taken", "Notify"], &[0]));
        session.refresh_checklist().await.unwrap();

        let view = session.controller().snapshot().await;
        assert_eq!(view.checklist.len(), 3);
        assert!(view.checklist[0].done);
        assert_eq!(view.phase, Phase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_both_halves() {
        let service = FakeService::with_plan(&["Flag on"], &[]);
        let session = StorySession::open("US-101", service, policy(), events::channel())
            .await
            .unwrap();
        session.controller().start().await.unwrap();

        session.teardown().await;
        assert!(session.controller().toggle("pre-deploy-1").await.is_err());
        assert!(session
            .registry()
            .run(ItemKind::TestCase, "test-case-1")
            .await
            .is_err());
    }
}
