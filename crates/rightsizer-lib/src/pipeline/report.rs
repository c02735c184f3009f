//! Final summary of a trial run

use super::run::{PipelineRun, ResourceStatus, RunPhase};
use crate::error::{ErrorKind, RunError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Record restored, with or without a stage error
    Reverted,
    /// Cancelled before any write
    Cancelled,
    /// Revert failed; the record still holds the modified value
    ManualInterventionRequired,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Reverted => "reverted",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::ManualInterventionRequired => "manual_intervention",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub correlation_id: Uuid,
    pub approval_id: Option<String>,
    pub cluster_name: String,
    pub record_name: String,
    pub outcome: RunOutcome,
    pub phase: RunPhase,
    pub changes: Vec<String>,
    pub new_resource_id: Option<String>,
    pub new_resource_status: Option<ResourceStatus>,
    pub reverted: bool,
    pub revert_verified: Option<bool>,
    pub manual_action_required: bool,
    pub error: Option<RunError>,
    pub revert_error: Option<RunError>,
    pub estimated_test_cost: f64,
    pub estimated_monthly_savings: f64,
    pub started_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
    pub reverted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub revert_window_secs: Option<f64>,
    /// SHA-256 of the record value the run restored to
    pub snapshot_sha256: Option<String>,
}

impl RunReport {
    pub fn from_run(run: &PipelineRun) -> Self {
        let outcome = if run.manual_action_required() {
            RunOutcome::ManualInterventionRequired
        } else if run.error.as_ref().map(|e| e.kind) == Some(ErrorKind::Approval)
            && !run.modify_attempted
        {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Reverted
        };

        Self {
            correlation_id: run.correlation_id,
            approval_id: run.approval_id.clone(),
            cluster_name: run.cluster_name.clone(),
            record_name: run.record_name.clone(),
            outcome,
            phase: run.phase,
            changes: run.changes.clone(),
            new_resource_id: run.new_resource_id.clone(),
            new_resource_status: run.new_resource_status,
            reverted: run.reverted,
            revert_verified: run.revert_verified,
            manual_action_required: run.manual_action_required(),
            error: run.error.clone(),
            revert_error: run.revert_error.clone(),
            estimated_test_cost: run.estimated_test_cost,
            estimated_monthly_savings: run.estimated_monthly_savings,
            started_at: run.started_at,
            modified_at: run.modified_at,
            reverted_at: run.reverted_at,
            finished_at: run.finished_at,
            revert_window_secs: run.revert_window_secs(),
            snapshot_sha256: run.snapshot.as_ref().map(|s| s.sha256.clone()),
        }
    }

    /// Human-readable lines, one fact each
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Cluster: {}", self.cluster_name),
            format!("Correlation id: {}", self.correlation_id),
            format!("Outcome: {}", self.outcome),
        ];
        if self.changes.is_empty() {
            lines.push("Changes: none".to_string());
        } else {
            lines.push(format!("Changes: {}", self.changes.join(", ")));
        }
        if let Some(id) = &self.new_resource_id {
            let status = self
                .new_resource_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            lines.push(format!("Trial cluster: {} ({})", id, status));
        }
        lines.push(format!("Reverted: {}", self.reverted));
        if let Some(secs) = self.revert_window_secs {
            lines.push(format!("Revert window: {:.1}s", secs));
        }
        if let Some(err) = &self.error {
            lines.push(format!("Error: {}", err));
        }
        if self.manual_action_required {
            lines.push(format!(
                "MANUAL ACTION REQUIRED: restore {} (rightsizer restore {})",
                self.record_name,
                self.approval_id.as_deref().unwrap_or("<approval-id>")
            ));
        }
        lines
    }
}
