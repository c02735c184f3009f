//! Pipeline run state
//!
//! A [`PipelineRun`] is created when an approval is received and is mutated
//! only by the stage functions of the executor, strictly in sequence.

use crate::error::{OptimizerError, RunError};
use crate::models::{Proposal, Recommendation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Initialized,
    BackedUp,
    Modified,
    Creating,
    Waiting,
    Reverting,
    Reported,
    FailedManualIntervention,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Initialized => "initialized",
            RunPhase::BackedUp => "backed_up",
            RunPhase::Modified => "modified",
            RunPhase::Creating => "creating",
            RunPhase::Waiting => "waiting",
            RunPhase::Reverting => "reverting",
            RunPhase::Reported => "reported",
            RunPhase::FailedManualIntervention => "failed_manual_intervention",
        }
    }

    /// Allowed edges of the run state machine.
    ///
    /// Every phase before `Reverting` may fall through to it; `Reverting`
    /// ends in either terminal phase, and a manual restore moves a
    /// `FailedManualIntervention` run to `Reported`.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Initialized, BackedUp)
                | (BackedUp, Modified)
                | (Modified, Creating)
                | (Creating, Waiting)
                | (Initialized | BackedUp | Modified | Creating | Waiting, Reverting)
                | (Reverting, Reported | FailedManualIntervention)
                | (FailedManualIntervention, Reported)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Reported | RunPhase::FailedManualIntervention)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the trial cluster as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    Ready,
    Failed,
    TimedOut,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Failed => "failed",
            ResourceStatus::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

pub fn fingerprint(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Pre-modification copy of the configuration record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub record_name: String,
    /// Exact stored value; dropped once the revert is confirmed
    pub raw_value: Option<String>,
    /// SHA-256 of the raw value, kept for verification and audit
    pub sha256: String,
    pub captured_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    pub fn capture(record_name: &str, raw_value: String) -> Self {
        Self {
            record_name: record_name.to_string(),
            sha256: fingerprint(&raw_value),
            raw_value: Some(raw_value),
            captured_at: Utc::now(),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        fingerprint(value) == self.sha256
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub correlation_id: Uuid,
    pub approval_id: Option<String>,
    pub cluster_name: String,
    pub record_name: String,
    pub phase: RunPhase,
    pub snapshot: Option<ConfigSnapshot>,
    pub recommendations: Vec<Recommendation>,
    pub estimated_test_cost: f64,
    pub estimated_monthly_savings: f64,
    #[serde(default)]
    pub changes: Vec<String>,
    pub new_resource_id: Option<String>,
    pub create_request_id: Option<String>,
    pub new_resource_status: Option<ResourceStatus>,
    /// The modify write was issued, whether or not it was acknowledged
    pub modify_attempted: bool,
    pub reverted: bool,
    /// Read-back after revert matched the snapshot
    pub revert_verified: Option<bool>,
    pub error: Option<RunError>,
    pub revert_error: Option<RunError>,
    pub started_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
    pub reverted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(proposal: &Proposal, record_name: &str) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            approval_id: None,
            cluster_name: proposal.cluster_name.clone(),
            record_name: record_name.to_string(),
            phase: RunPhase::Initialized,
            snapshot: None,
            recommendations: proposal.actionable().cloned().collect(),
            estimated_test_cost: proposal.cost.test_run_cost,
            estimated_monthly_savings: proposal.cost.monthly_savings,
            changes: Vec::new(),
            new_resource_id: None,
            create_request_id: None,
            new_resource_status: None,
            modify_attempted: false,
            reverted: false,
            revert_verified: None,
            error: None,
            revert_error: None,
            started_at: Utc::now(),
            modified_at: None,
            reverted_at: None,
            finished_at: None,
        }
    }

    pub fn with_approval_id(mut self, approval_id: &str) -> Self {
        self.approval_id = Some(approval_id.to_string());
        self
    }

    pub fn advance(&mut self, next: RunPhase) {
        if !self.phase.can_transition_to(next) {
            warn!(
                correlation_id = %self.correlation_id,
                from = %self.phase,
                to = %next,
                "Unexpected phase transition"
            );
        }
        debug!(correlation_id = %self.correlation_id, from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
    }

    /// Record the first stage error; later ones are logged only
    pub fn fail(&mut self, err: &OptimizerError) {
        if self.error.is_none() {
            self.error = Some(err.to_run_error());
        } else {
            debug!(correlation_id = %self.correlation_id, error = %err, "Subsequent stage error");
        }
    }

    pub fn manual_action_required(&self) -> bool {
        self.phase == RunPhase::FailedManualIntervention
    }

    /// Seconds between the modify write and the revert write
    pub fn revert_window_secs(&self) -> Option<f64> {
        let modified = self.modified_at?;
        let reverted = self.reverted_at?;
        Some((reverted - modified).num_milliseconds().max(0) as f64 / 1000.0)
    }
}
