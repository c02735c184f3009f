//! Trial execution
//!
//! Runs one approved proposal through backup, modify, create, wait, revert
//! and report. Any failure after the backup routes to revert; a failed
//! revert ends the run flagged for manual intervention.

use super::checkpoint::{ApprovalGate, CheckpointState};
use super::poller::StatusPoller;
use super::record::apply_recommendations;
use super::report::RunReport;
use super::run::{ConfigSnapshot, PipelineRun, ResourceStatus, RunPhase};
use crate::audit::{AuditEvent, AuditEventKind, AuditLog};
use crate::client::{ConfigStore, ResourceProvisioner, RetryExecutor};
use crate::error::{OptimizerError, Result};
use crate::models::{Architecture, Proposal};
use crate::observability::PipelineMetrics;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const DEFAULT_RECORD_PREFIX: &str = "/application/cluster-config/prod/";

/// Limits checked before any infrastructure call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Guardrails {
    /// Upper bound on the estimated cost of one trial run, in USD
    pub max_test_cost: f64,
    /// Upper bound on CORE plus TASK nodes of the trial cluster
    pub max_cluster_instances: u32,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            max_test_cost: 50.0,
            max_cluster_instances: 20,
        }
    }
}

impl Guardrails {
    pub fn check(&self, proposal: &Proposal) -> Result<()> {
        if !proposal.has_actionable() {
            return Err(OptimizerError::NothingToApply(proposal.cluster_name.clone()));
        }

        if proposal.cost.test_run_cost > self.max_test_cost {
            return Err(OptimizerError::Guardrail(format!(
                "test run would cost ${:.2}, limit is ${:.2}",
                proposal.cost.test_run_cost, self.max_test_cost
            )));
        }

        let workers = proposal.worker_instances();
        if workers > self.max_cluster_instances {
            return Err(OptimizerError::Guardrail(format!(
                "cluster has {} worker nodes, limit is {}",
                workers, self.max_cluster_instances
            )));
        }

        // One architecture flag covers every fleet
        if proposal.actionable().any(|r| r.architecture_changed) {
            let targets: HashSet<Architecture> = proposal
                .recommendations
                .iter()
                .filter(|r| r.role.is_worker())
                .map(|r| r.effective_spec().architecture)
                .collect();
            if targets.len() > 1 {
                return Err(OptimizerError::Guardrail(
                    "worker fleets would need different CPU architectures".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prepended to the cluster name to form the record name
    pub record_prefix: String,
    pub guardrails: Guardrails,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            record_prefix: DEFAULT_RECORD_PREFIX.to_string(),
            guardrails: Guardrails::default(),
        }
    }
}

/// Requests cancellation of a run that has not modified anything yet
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal nobody can trigger
    pub fn never() -> Self {
        cancellation().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

pub struct TrialPipeline {
    store: Arc<dyn ConfigStore>,
    provisioner: Arc<dyn ResourceProvisioner>,
    poller: StatusPoller,
    retry: RetryExecutor,
    audit: AuditLog,
    metrics: PipelineMetrics,
    gate: Option<ApprovalGate>,
    config: PipelineConfig,
}

impl TrialPipeline {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        provisioner: Arc<dyn ResourceProvisioner>,
        poller: StatusPoller,
        retry: RetryExecutor,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            provisioner,
            poller,
            retry,
            audit: AuditLog::new(),
            metrics: PipelineMetrics::new(),
            gate: None,
            config,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_gate(mut self, gate: ApprovalGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn record_name(&self, cluster_name: &str) -> String {
        format!("{}{}", self.config.record_prefix, cluster_name)
    }

    pub fn new_run(&self, proposal: &Proposal) -> PipelineRun {
        PipelineRun::new(proposal, &self.record_name(&proposal.cluster_name))
    }

    fn gate(&self) -> Result<&ApprovalGate> {
        self.gate
            .as_ref()
            .ok_or_else(|| OptimizerError::Checkpoint("no checkpoint store configured".to_string()))
    }

    /// Claim a pending approval and run the trial
    pub async fn approve(&self, approval_id: &str, cancel: &CancelSignal) -> Result<RunReport> {
        let gate = self.gate()?;
        let pending = gate.load(approval_id).await?;
        if pending.state == CheckpointState::AwaitingApproval {
            self.config.guardrails.check(&pending.proposal)?;
        }
        let checkpoint = gate.claim(approval_id).await?;
        let mut run = self.new_run(&checkpoint.proposal).with_approval_id(approval_id);
        Ok(self.execute(&mut run, cancel).await)
    }

    /// Drive a run to a terminal phase.
    ///
    /// Never fails: every error is recorded on the run and in the report.
    pub async fn execute(&self, run: &mut PipelineRun, cancel: &CancelSignal) -> RunReport {
        self.metrics.run_started();
        info!(
            cluster = %run.cluster_name,
            correlation_id = %run.correlation_id,
            recommendations = run.recommendations.len(),
            "Starting trial run"
        );
        self.audit.record(
            AuditEvent::new(AuditEventKind::RunStarted, &run.cluster_name, run.correlation_id)
                .with_detail(json!({
                    "approvalId": run.approval_id,
                    "record": run.record_name,
                })),
        );
        self.persist(run).await;

        if let Err(e) = self.forward(run, cancel).await {
            warn!(
                cluster = %run.cluster_name,
                correlation_id = %run.correlation_id,
                phase = %run.phase,
                error = %e,
                "Stage failed, reverting"
            );
            run.fail(&e);
        }

        self.revert(run).await;
        let report = self.report(run).await;
        self.metrics.run_finished();
        report
    }

    async fn forward(&self, run: &mut PipelineRun, cancel: &CancelSignal) -> Result<()> {
        self.check_cancel(run, cancel)?;
        self.backup(run).await?;
        self.persist(run).await;

        // Last point where cancellation is honored
        self.check_cancel(run, cancel)?;
        self.modify(run).await?;
        self.persist(run).await;

        self.create(run).await?;
        self.persist(run).await;

        self.wait(run).await?;
        self.persist(run).await;
        Ok(())
    }

    fn check_cancel(&self, run: &PipelineRun, cancel: &CancelSignal) -> Result<()> {
        if cancel.is_cancelled() {
            info!(cluster = %run.cluster_name, phase = %run.phase, "Run cancelled before modification");
            let id = run
                .approval_id
                .clone()
                .unwrap_or_else(|| run.correlation_id.to_string());
            return Err(OptimizerError::ApprovalCancelled(id));
        }
        Ok(())
    }

    fn stage_failed(&self, stage: &str, err: OptimizerError) -> OptimizerError {
        self.metrics.inc_stage_failure(stage);
        err
    }

    async fn backup(&self, run: &mut PipelineRun) -> Result<()> {
        let name = run.record_name.clone();
        let raw = self
            .retry
            .execute("config_store.get", || self.store.get(&name))
            .await
            .map_err(|e| self.stage_failed("backup", e))?;

        let snapshot = ConfigSnapshot::capture(&name, raw);
        self.audit.record(
            AuditEvent::new(AuditEventKind::ConfigRead, &run.cluster_name, run.correlation_id)
                .with_detail(json!({
                    "record": name,
                    "sha256": snapshot.sha256,
                })),
        );
        debug!(record = %name, sha256 = %snapshot.sha256, "Configuration backed up");
        run.snapshot = Some(snapshot);
        run.advance(RunPhase::BackedUp);
        Ok(())
    }

    async fn modify(&self, run: &mut PipelineRun) -> Result<()> {
        let raw = run
            .snapshot
            .as_ref()
            .and_then(|s| s.raw_value.as_deref())
            .ok_or_else(|| OptimizerError::ConfigParse("no backed-up value".to_string()))?;

        let (modified, changes) = apply_recommendations(raw, &run.recommendations)
            .map_err(|e| self.stage_failed("modify", e))?;
        if changes.is_empty() {
            return Err(self.stage_failed(
                "modify",
                OptimizerError::NothingToApply(run.cluster_name.clone()),
            ));
        }

        let name = run.record_name.clone();
        run.changes = changes.clone();
        run.modify_attempted = true;
        let result = self
            .retry
            .execute("config_store.put", || self.store.put(&name, &modified))
            .await;

        self.audit.record(
            AuditEvent::new(AuditEventKind::ConfigModify, &run.cluster_name, run.correlation_id)
                .with_changes(changes)
                .with_detail(json!({
                    "success": result.is_ok(),
                    "error": result.as_ref().err().map(|e| e.to_string()),
                })),
        );
        result.map_err(|e| self.stage_failed("modify", e))?;

        run.modified_at = Some(Utc::now());
        run.advance(RunPhase::Modified);
        info!(cluster = %run.cluster_name, changes = ?run.changes, "Configuration modified");
        Ok(())
    }

    async fn create(&self, run: &mut PipelineRun) -> Result<()> {
        self.audit.record(AuditEvent::new(
            AuditEventKind::ResourceCreate,
            &run.cluster_name,
            run.correlation_id,
        ));

        let cluster_name = run.cluster_name.clone();
        let result = match self
            .retry
            .execute("provisioner.create", || self.provisioner.create(&cluster_name))
            .await
        {
            Ok(accepted) if accepted.resource_id.is_none() && accepted.request_id.is_none() => {
                Err(OptimizerError::ResourceCreation(
                    "provisioner returned neither a cluster id nor a request id".to_string(),
                ))
            }
            Ok(accepted) => Ok(accepted),
            Err(OptimizerError::Api { operation, source }) => Err(OptimizerError::ResourceCreation(
                format!("{}: {}", operation, source),
            )),
            Err(e) => Err(e),
        };

        self.audit.record(
            AuditEvent::new(
                AuditEventKind::ResourceCreateResult,
                &run.cluster_name,
                run.correlation_id,
            )
            .with_detail(match &result {
                Ok(accepted) => json!({
                    "success": true,
                    "resourceId": accepted.resource_id,
                    "requestId": accepted.request_id,
                }),
                Err(e) => json!({"success": false, "error": e.to_string()}),
            }),
        );

        let accepted = result.map_err(|e| self.stage_failed("create", e))?;
        run.new_resource_id = accepted.resource_id;
        run.create_request_id = accepted.request_id;
        run.new_resource_status = Some(ResourceStatus::Pending);
        run.advance(RunPhase::Creating);
        Ok(())
    }

    async fn wait(&self, run: &mut PipelineRun) -> Result<()> {
        let budget = self.poller.budget();

        let resource_id = match run.new_resource_id.clone() {
            Some(id) => id,
            None => {
                let located = self
                    .poller
                    .locate(&run.cluster_name, run.started_at, &budget)
                    .await
                    .map_err(|e| self.stage_failed("wait", e))?;
                match located {
                    Some(id) => {
                        run.new_resource_id = Some(id.clone());
                        id
                    }
                    None => {
                        run.new_resource_status = Some(ResourceStatus::TimedOut);
                        let pending = run
                            .create_request_id
                            .clone()
                            .unwrap_or_else(|| run.cluster_name.clone());
                        return Err(self.stage_failed(
                            "wait",
                            OptimizerError::PollTimeout {
                                resource_id: pending,
                                waited_secs: budget.elapsed().as_secs(),
                            },
                        ));
                    }
                }
            }
        };
        run.advance(RunPhase::Waiting);

        let audit = &self.audit;
        let cluster_name = run.cluster_name.clone();
        let correlation_id = run.correlation_id;
        let outcome = self
            .poller
            .wait(&resource_id, &budget, |report| {
                audit.record(
                    AuditEvent::new(AuditEventKind::StatusChange, &cluster_name, correlation_id)
                        .with_detail(json!({
                            "resourceId": resource_id,
                            "state": report.raw_state,
                            "reason": report.reason,
                        })),
                );
            })
            .await
            .map_err(|e| self.stage_failed("wait", e))?;

        run.new_resource_status = Some(outcome.status);
        match outcome.status {
            ResourceStatus::Ready | ResourceStatus::Pending => {
                info!(resource_id = %resource_id, polls = outcome.polls, "Trial cluster is up");
                Ok(())
            }
            ResourceStatus::Failed => {
                let (state, reason) = outcome
                    .last_report
                    .map(|r| (r.raw_state, r.reason.unwrap_or_default()))
                    .unwrap_or_default();
                Err(self.stage_failed(
                    "wait",
                    OptimizerError::ResourceCreation(format!(
                        "cluster {} entered {} {}",
                        resource_id, state, reason
                    )
                    .trim_end()
                    .to_string()),
                ))
            }
            ResourceStatus::TimedOut => Err(self.stage_failed(
                "wait",
                OptimizerError::PollTimeout {
                    resource_id: resource_id.clone(),
                    waited_secs: outcome.waited.as_secs(),
                },
            )),
        }
    }

    /// Restore the backed-up record.
    ///
    /// Safe to call repeatedly: an already reverted run is left alone, and a
    /// run flagged for manual intervention is never retried automatically.
    pub async fn revert(&self, run: &mut PipelineRun) {
        if run.reverted {
            debug!(correlation_id = %run.correlation_id, "Run already reverted");
            return;
        }
        if run.phase == RunPhase::FailedManualIntervention {
            warn!(correlation_id = %run.correlation_id, "Revert skipped, run awaits manual restore");
            return;
        }
        if run.phase != RunPhase::Reverting {
            run.advance(RunPhase::Reverting);
        }

        let Some(snapshot) = run.snapshot.clone().filter(|_| run.modify_attempted) else {
            // Nothing was written
            run.reverted = true;
            self.discard_raw(run);
            self.audit.record(
                AuditEvent::new(AuditEventKind::ConfigRevert, &run.cluster_name, run.correlation_id)
                    .with_detail(json!({"success": true, "skipped": true})),
            );
            return;
        };
        let name = snapshot.record_name.clone();

        // An unacknowledged modify write may or may not have landed
        if run.modified_at.is_none() {
            if let Ok(current) = self
                .retry
                .execute("config_store.get", || self.store.get(&name))
                .await
            {
                if snapshot.matches(&current) {
                    info!(record = %name, "Modify write did not land, nothing to revert");
                    run.reverted = true;
                    run.revert_verified = Some(true);
                    self.discard_raw(run);
                    self.audit.record(
                        AuditEvent::new(AuditEventKind::ConfigRevert, &run.cluster_name, run.correlation_id)
                            .with_detail(json!({"success": true, "skipped": true, "verified": true})),
                    );
                    return;
                }
            }
        }

        let result = match snapshot.raw_value.as_deref() {
            Some(raw) => {
                self.retry
                    .execute("config_store.put", || self.store.put(&name, raw))
                    .await
            }
            None => Err(OptimizerError::RevertFailure {
                record: name.clone(),
                reason: "backed-up value is no longer available".to_string(),
            }),
        };

        match result {
            Ok(()) => {
                run.reverted = true;
                run.reverted_at = Some(Utc::now());
                if let Some(window) = run.revert_window_secs() {
                    self.metrics.observe_revert_window(window);
                }
                let verified = self.verify(&snapshot).await;
                run.revert_verified = Some(verified);
                self.discard_raw(run);
                info!(
                    record = %name,
                    verified,
                    window_secs = ?run.revert_window_secs(),
                    "Configuration reverted"
                );
                self.audit.record(
                    AuditEvent::new(AuditEventKind::ConfigRevert, &run.cluster_name, run.correlation_id)
                        .with_detail(json!({
                            "success": true,
                            "verified": verified,
                            "windowSecs": run.revert_window_secs(),
                        })),
                );
            }
            Err(e) => {
                let failure = match e {
                    e @ OptimizerError::RevertFailure { .. } => e,
                    other => OptimizerError::RevertFailure {
                        record: name.clone(),
                        reason: other.to_string(),
                    },
                };
                error!(
                    record = %name,
                    correlation_id = %run.correlation_id,
                    error = %failure,
                    "Revert failed, manual intervention required"
                );
                self.metrics.inc_stage_failure("revert");
                run.revert_error = Some(failure.to_run_error());
                run.fail(&failure);
                self.audit.record(
                    AuditEvent::new(AuditEventKind::ConfigRevert, &run.cluster_name, run.correlation_id)
                        .with_detail(json!({"success": false, "error": failure.to_string()})),
                );
            }
        }
    }

    /// Read the record back and compare it to the snapshot
    async fn verify(&self, snapshot: &ConfigSnapshot) -> bool {
        let name = &snapshot.record_name;
        match self
            .retry
            .execute("config_store.get", || self.store.get(name))
            .await
        {
            Ok(current) if snapshot.matches(&current) => true,
            Ok(_) => {
                warn!(record = %name, "Record differs from the backed-up value after revert");
                false
            }
            Err(e) => {
                warn!(record = %name, error = %e, "Could not read record back after revert");
                false
            }
        }
    }

    fn discard_raw(&self, run: &mut PipelineRun) {
        if let Some(snapshot) = run.snapshot.as_mut() {
            snapshot.raw_value = None;
        }
    }

    async fn report(&self, run: &mut PipelineRun) -> RunReport {
        let terminal = if run.reverted {
            RunPhase::Reported
        } else {
            RunPhase::FailedManualIntervention
        };
        run.advance(terminal);
        run.finished_at = Some(Utc::now());

        let report = RunReport::from_run(run);
        self.metrics.inc_runs(report.outcome.as_str());
        self.audit.record(
            AuditEvent::new(AuditEventKind::RunReported, &run.cluster_name, run.correlation_id)
                .with_changes(report.changes.clone())
                .with_detail(json!({
                    "outcome": report.outcome,
                    "reverted": report.reverted,
                    "manualActionRequired": report.manual_action_required,
                    "resourceId": report.new_resource_id,
                    "resourceStatus": report.new_resource_status,
                    "error": report.error.as_ref().map(|e| e.to_string()),
                })),
        );

        if report.manual_action_required {
            error!(
                cluster = %run.cluster_name,
                record = %run.record_name,
                correlation_id = %run.correlation_id,
                "Trial run finished without restoring the configuration record"
            );
        } else {
            info!(
                cluster = %run.cluster_name,
                correlation_id = %run.correlation_id,
                outcome = %report.outcome,
                "Trial run finished"
            );
        }

        self.persist(run).await;
        report
    }

    /// Operator-initiated restore of a run recorded in the checkpoint store
    pub async fn restore(&self, approval_id: &str) -> Result<RunReport> {
        let gate = self.gate()?;
        let checkpoint = gate.load(approval_id).await?;
        let mut run = checkpoint.run.ok_or_else(|| {
            OptimizerError::Checkpoint(format!("approval {} has no recorded run", approval_id))
        })?;
        let report = self.restore_run(&mut run).await?;
        gate.record_run(approval_id, &run).await?;
        Ok(report)
    }

    /// Re-write the retained raw value of a run; no-op when already reverted
    pub async fn restore_run(&self, run: &mut PipelineRun) -> Result<RunReport> {
        if run.reverted {
            info!(correlation_id = %run.correlation_id, "Run already reverted, nothing to restore");
            return Ok(RunReport::from_run(run));
        }

        let snapshot = run.snapshot.clone().ok_or_else(|| OptimizerError::RevertFailure {
            record: run.record_name.clone(),
            reason: "run has no backed-up value".to_string(),
        })?;
        let raw = snapshot
            .raw_value
            .as_deref()
            .ok_or_else(|| OptimizerError::RevertFailure {
                record: snapshot.record_name.clone(),
                reason: "backed-up value is no longer available".to_string(),
            })?;

        let name = snapshot.record_name.clone();
        self.retry
            .execute("config_store.put", || self.store.put(&name, raw))
            .await
            .map_err(|e| OptimizerError::RevertFailure {
                record: name.clone(),
                reason: e.to_string(),
            })?;

        run.reverted = true;
        run.reverted_at = Some(Utc::now());
        run.revert_verified = Some(self.verify(&snapshot).await);
        self.discard_raw(run);
        if !run.phase.is_terminal() {
            run.advance(RunPhase::Reverting);
        }
        run.advance(RunPhase::Reported);
        run.finished_at.get_or_insert_with(Utc::now);

        self.audit.record(
            AuditEvent::new(AuditEventKind::ManualRestore, &run.cluster_name, run.correlation_id)
                .with_detail(json!({
                    "record": name,
                    "verified": run.revert_verified,
                })),
        );
        info!(record = %name, correlation_id = %run.correlation_id, "Configuration restored manually");
        Ok(RunReport::from_run(run))
    }

    async fn persist(&self, run: &PipelineRun) {
        let (Some(gate), Some(id)) = (self.gate.as_ref(), run.approval_id.as_deref()) else {
            return;
        };
        if let Err(e) = gate.record_run(id, run).await {
            warn!(approval_id = id, error = %e, "Failed to persist run state");
        }
    }
}
