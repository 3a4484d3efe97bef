//! Payloads served by the story/analysis service.
//!
//! These mirror the upstream JSON closely and tolerate missing sections: the
//! impact report is produced by a language model and any list may be absent.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ShipgateError;
use crate::types::{ChecklistItem, ItemKind};

// ---------------------------------------------------------------------------
// StorySummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySummary {
    pub story_number: String,
    #[serde(default)]
    pub story_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
    #[serde(default)]
    pub impacted_csi: Option<String>,
}

/// Body of a story creation request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewStory {
    pub story_number: String,
    #[serde(default)]
    pub story_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub impacted_csi: String,
}

impl NewStory {
    /// A story needs a number; every other field may be blank.
    pub fn validate(&self) -> Result<(), ShipgateError> {
        let number = self.story_number.trim();
        if number.is_empty() || number.contains('/') {
            return Err(ShipgateError::InvalidValue {
                kind: "story number",
                value: self.story_number.clone(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ImpactReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub name: String,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendImpact {
    pub component_name: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub fields_to_add: Vec<FieldChange>,
    #[serde(default)]
    pub risk_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendImpact {
    pub service_name: String,
    #[serde(default)]
    pub endpoint_path: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub fields_to_add: Vec<FieldChange>,
    #[serde(default)]
    pub db_changes: Vec<String>,
    #[serde(default)]
    pub risk_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossServiceRisk {
    pub from_service: String,
    pub to_service: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub risk_score: u8,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestingPlan {
    #[serde(default)]
    pub critical_test_cases: Vec<String>,
    #[serde(default)]
    pub edge_cases_to_validate: Vec<String>,
    #[serde(default)]
    pub monitoring_and_alerts: Vec<String>,
    #[serde(default)]
    pub data_migration_risks: Vec<String>,
    #[serde(default)]
    pub production_deployment_checklist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub story_number: String,
    #[serde(default)]
    pub suggested_branch_name: Option<String>,
    #[serde(default)]
    pub overall_summary: String,
    #[serde(default)]
    pub overall_risk_level: RiskLevel,
    #[serde(default)]
    pub overall_risk_score: u8,
    #[serde(default)]
    pub frontend_impacts: Vec<FrontendImpact>,
    #[serde(default)]
    pub backend_impacts: Vec<BackendImpact>,
    #[serde(default)]
    pub cross_service_risks: Vec<CrossServiceRisk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testing_and_validation: Option<TestingPlan>,
}

/// A runnable test or validation item derived from an upstream plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestItem {
    pub kind: ItemKind,
    pub id: String,
    pub label: String,
}

impl ImpactReport {
    /// Critical test cases and edge cases, with 1-based positional ids
    /// (`test-case-1`, `edge-case-1`, ...).
    pub fn test_items(&self) -> Vec<TestItem> {
        let Some(plan) = &self.testing_and_validation else {
            return Vec::new();
        };
        let cases = plan
            .critical_test_cases
            .iter()
            .enumerate()
            .map(|(i, label)| TestItem {
                kind: ItemKind::TestCase,
                id: format!("test-case-{}", i + 1),
                label: label.clone(),
            });
        let edges = plan
            .edge_cases_to_validate
            .iter()
            .enumerate()
            .map(|(i, label)| TestItem {
                kind: ItemKind::EdgeCase,
                id: format!("edge-case-{}", i + 1),
                label: label.clone(),
            });
        cases.chain(edges).collect()
    }
}

// ---------------------------------------------------------------------------
// DeploymentPlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub estimated_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRestart {
    pub service_name: String,
    #[serde(default)]
    pub health_check: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlagStrategy {
    #[serde(default)]
    pub flag_name: Option<String>,
    #[serde(default)]
    pub rollout_percentage: Option<u8>,
    #[serde(default)]
    pub rollout_schedule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentResponse {
    #[serde(default)]
    pub primary_contact: Option<String>,
    #[serde(default)]
    pub escalation_path: Option<String>,
    #[serde(default)]
    pub response_sla: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeploymentPlan {
    #[serde(default)]
    pub pre_deployment_checklist: Vec<String>,
    /// Indices into `pre_deployment_checklist` that must be done before the
    /// deployment may start.
    #[serde(default)]
    pub required_checklist_items: Vec<usize>,
    #[serde(default)]
    pub database_migration_order: Vec<MigrationStep>,
    #[serde(default)]
    pub service_restart_sequence: Vec<ServiceRestart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_flag_strategy: Option<FeatureFlagStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_response: Option<IncidentResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_windows: Option<serde_json::Value>,
}

impl DeploymentPlan {
    /// Convert the plan's checklist into gate items.
    ///
    /// Ids are positional (`pre-deploy-1`, ...), so they stay stable as long as
    /// the upstream plan for the story is unchanged. Out-of-range entries in
    /// `required_checklist_items` are ignored.
    pub fn checklist_items(&self) -> Vec<ChecklistItem> {
        self.pre_deployment_checklist
            .iter()
            .enumerate()
            .map(|(idx, label)| {
                ChecklistItem::new(
                    format!("pre-deploy-{}", idx + 1),
                    label.clone(),
                    self.required_checklist_items.contains(&idx),
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MigrationPlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MigrationRisk {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MigrationPlan {
    #[serde(default)]
    pub existing_data_transformations: Vec<MigrationRisk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_strategy: Option<String>,
    #[serde(default)]
    pub data_validation_checkpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_migration_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<String>,
}

impl MigrationPlan {
    /// Migration risks as runnable items, labelled by title.
    pub fn risk_items(&self) -> Vec<TestItem> {
        self.existing_data_transformations
            .iter()
            .map(|r| TestItem {
                kind: ItemKind::MigrationRisk,
                id: r.id.clone(),
                label: r.title.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Upstream test results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_response_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p99_latency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,
    /// Percent of failed requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
}

/// Aggregate results the test service keeps for a story, independent of the
/// runs started through a session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestResultsReport {
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ResultMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_summary: Option<serde_json::Value>,
}

impl TestResultsReport {
    /// Rounded percentage of `total` that passed; 0 when nothing ran.
    pub fn success_rate(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (f64::from(self.passed) / f64::from(self.total) * 100.0).round() as u32
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
