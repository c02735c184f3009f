//! Integration tests for the trial pipeline
//!
//! These tests verify:
//! - Every run ends reverted or flagged for manual intervention
//! - The record is byte-identical after every non-flagged run
//! - Approval is resumed exactly once and cancellation stops before writes

use super::*;
use crate::audit::{AuditEventKind, AuditLog, MemoryAuditSink};
use crate::client::{
    async_trait, ApiResult, CreateAccepted, ResourceProvisioner, RetryExecutor,
};
use crate::error::{ApiError, ErrorKind, OptimizerError};
use crate::models::{ClusterSummary, Proposal};
use crate::testing::{
    report, sample_proposal, sample_record, FakeConfigStore, FakeInventory, FakeProvisioner,
    FakeStatusSource, CLUSTER_NAME, RECORD_NAME,
};
use chrono::Utc;
use std::sync::Arc;

struct Harness {
    store: Arc<FakeConfigStore>,
    provisioner: Arc<dyn ResourceProvisioner>,
    status: Arc<FakeStatusSource>,
    inventory: Arc<FakeInventory>,
    audit: Arc<MemoryAuditSink>,
    gate: ApprovalGate,
}

impl Harness {
    fn new(provisioner: Arc<dyn ResourceProvisioner>, status: FakeStatusSource) -> Self {
        Self {
            store: Arc::new(FakeConfigStore::with_record(RECORD_NAME, &sample_record())),
            provisioner,
            status: Arc::new(status),
            inventory: Arc::new(FakeInventory::default()),
            audit: Arc::new(MemoryAuditSink::new()),
            gate: ApprovalGate::new(Arc::new(MemoryCheckpointStore::new())),
        }
    }

    fn ready() -> Self {
        Self::new(Arc::new(FakeProvisioner::accepting("j-TRIAL")), FakeStatusSource::scripted(
            vec![Ok(report("STARTING")), Ok(report("BOOTSTRAPPING"))],
            "WAITING",
        ))
    }

    fn pipeline(&self) -> TrialPipeline {
        let poller = StatusPoller::new(
            self.status.clone(),
            self.inventory.clone(),
            RetryExecutor::default(),
            PollerConfig::default(),
        );
        TrialPipeline::new(
            self.store.clone(),
            self.provisioner.clone(),
            poller,
            RetryExecutor::default(),
            PipelineConfig::default(),
        )
        .with_audit(AuditLog::new().with_sink(self.audit.clone()))
        .with_gate(self.gate.clone())
    }

    async fn run(&self) -> (RunReport, PipelineRun) {
        self.run_with(sample_proposal(), &CancelSignal::never()).await
    }

    async fn run_with(&self, proposal: Proposal, cancel: &CancelSignal) -> (RunReport, PipelineRun) {
        let id = self.gate.submit(proposal).await.unwrap();
        let report = self.pipeline().approve(&id, cancel).await.unwrap();
        let run = self.gate.load(&id).await.unwrap().run.unwrap();
        (report, run)
    }

    fn record(&self) -> String {
        self.store.value(RECORD_NAME).unwrap()
    }

    /// Create calls as seen by the audit trail
    fn create_requests(&self) -> usize {
        self.audit
            .kinds()
            .iter()
            .filter(|k| **k == AuditEventKind::ResourceCreate)
            .count()
    }
}

/// Revert invariant plus byte equality for runs that were not flagged
fn assert_restored(h: &Harness, report: &RunReport) {
    assert!(report.reverted || report.manual_action_required);
    assert!(report.reverted);
    assert!(!report.manual_action_required);
    assert_eq!(report.phase, RunPhase::Reported);
    assert_eq!(h.record(), sample_record());
}

mod happy_path_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ready_cluster_then_revert() {
        let h = Harness::ready();
        let (report, run) = h.run().await;

        assert_restored(&h, &report);
        assert_eq!(report.outcome, RunOutcome::Reverted);
        assert!(report.error.is_none());
        assert_eq!(report.new_resource_id.as_deref(), Some("j-TRIAL"));
        assert_eq!(report.new_resource_status, Some(ResourceStatus::Ready));
        assert_eq!(report.revert_verified, Some(true));
        assert_eq!(
            report.changes,
            vec!["CORE: r5.4xlarge -> r5.2xlarge", "TASK: m5.4xlarge -> m5.xlarge"]
        );
        assert!(report.revert_window_secs.is_some());

        // Modified value then the original, nothing else
        let written = h.store.written_values();
        assert_eq!(written.len(), 2);
        assert_ne!(written[0], sample_record());
        assert_eq!(written[1], sample_record());

        // Raw value is dropped once the revert is confirmed
        assert!(run.snapshot.as_ref().unwrap().raw_value.is_none());
        assert_eq!(run.snapshot.unwrap().sha256, fingerprint(&sample_record()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_audit_trail_order() {
        let h = Harness::ready();
        let (report, _) = h.run().await;

        use AuditEventKind::*;
        assert_eq!(
            h.audit.kinds(),
            vec![
                RunStarted,
                ConfigRead,
                ConfigModify,
                ResourceCreate,
                ResourceCreateResult,
                StatusChange,
                StatusChange,
                StatusChange,
                ConfigRevert,
                RunReported,
            ]
        );
        let events = h.audit.events();
        assert!(events.iter().all(|e| e.correlation_id == report.correlation_id));
        assert!(events.iter().all(|e| e.cluster_name == CLUSTER_NAME));
        assert_eq!(events[2].changes.as_ref().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_completed_with_final_run() {
        let h = Harness::ready();
        let id = h.gate.submit(sample_proposal()).await.unwrap();
        h.pipeline().approve(&id, &CancelSignal::never()).await.unwrap();

        let checkpoint = h.gate.load(&id).await.unwrap();
        assert_eq!(checkpoint.state, CheckpointState::Completed);
        assert_eq!(checkpoint.run.unwrap().phase, RunPhase::Reported);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locates_cluster_by_name_when_only_request_id_returned() {
        let mut h = Harness::new(
            Arc::new(FakeProvisioner::responding(Ok(CreateAccepted {
                resource_id: None,
                request_id: Some("req-42".into()),
            }))),
            FakeStatusSource::always("RUNNING"),
        );
        let inventory = FakeInventory::default();
        inventory.add_cluster(ClusterSummary {
            id: "j-FOUND".into(),
            name: CLUSTER_NAME.into(),
            state: "STARTING".into(),
            created_at: Utc::now() + chrono::Duration::seconds(5),
            ended_at: None,
        });
        h.inventory = Arc::new(inventory);

        let (report, run) = h.run().await;
        assert_restored(&h, &report);
        assert_eq!(report.new_resource_id.as_deref(), Some("j-FOUND"));
        assert_eq!(run.create_request_id.as_deref(), Some("req-42"));
        assert_eq!(report.new_resource_status, Some(ResourceStatus::Ready));
    }
}

mod failure_routing_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fatal_create_error_reverts() {
        let h = Harness::new(
            Arc::new(FakeProvisioner::responding(Err(ApiError::InvalidRequest(
                "unknown template".into(),
            )))),
            FakeStatusSource::always("RUNNING"),
        );
        let (report, _) = h.run().await;

        assert_restored(&h, &report);
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::ResourceCreation);
        assert_eq!(h.status.polls(), 0);
        assert!(report.new_resource_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_retry_exhaustion_reverts() {
        let provisioner = Arc::new(FakeProvisioner::responding(Err(ApiError::Throttled(
            "Throttling".into(),
        ))));
        let h = Harness::new(provisioner.clone(), FakeStatusSource::always("RUNNING"));
        let (report, _) = h.run().await;

        assert_restored(&h, &report);
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::TransientApi);
        assert_eq!(provisioner.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_reverts() {
        let h = Harness::new(
            Arc::new(FakeProvisioner::accepting("j-TRIAL")),
            FakeStatusSource::always("BOOTSTRAPPING"),
        );
        let (report, _) = h.run().await;

        assert_restored(&h, &report);
        assert_eq!(report.new_resource_status, Some(ResourceStatus::TimedOut));
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::PollTimeout);
        assert_eq!(h.status.polls(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cluster_reverts() {
        let h = Harness::new(
            Arc::new(FakeProvisioner::accepting("j-TRIAL")),
            FakeStatusSource::always("TERMINATED_WITH_ERRORS"),
        );
        let (report, _) = h.run().await;

        assert_restored(&h, &report);
        assert_eq!(report.new_resource_status, Some(ResourceStatus::Failed));
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::ResourceCreation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlocatable_cluster_times_out() {
        let h = Harness::new(
            Arc::new(FakeProvisioner::responding(Ok(CreateAccepted {
                resource_id: None,
                request_id: Some("req-42".into()),
            }))),
            FakeStatusSource::always("RUNNING"),
        );
        let (report, _) = h.run().await;

        assert_restored(&h, &report);
        assert_eq!(report.new_resource_status, Some(ResourceStatus::TimedOut));
        assert!(report.error.as_ref().unwrap().message.contains("req-42"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_record_never_written() {
        let h = Harness::ready();
        h.store.set_value(RECORD_NAME, "{\"Instances\": \"{broken\"}");
        let (report, _) = h.run().await;

        assert!(report.reverted);
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::ConfigParse);
        assert_eq!(h.store.put_attempts(), 0);
        assert_eq!(h.record(), "{\"Instances\": \"{broken\"}");
        assert_eq!(h.create_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_failure_touches_nothing() {
        let h = Harness::ready();
        h.store.fail_gets(vec![ApiError::Unauthorized("expired".into())]);
        let (report, _) = h.run().await;

        assert_restored(&h, &report);
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::Api);
        assert_eq!(h.store.put_attempts(), 0);
        assert_eq!(h.create_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_modify_write_needs_no_restore() {
        let h = Harness::ready();
        h.store.fail_put(0, ApiError::InvalidRequest("value too large".into()));
        let (report, _) = h.run().await;

        assert_restored(&h, &report);
        assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::Api);
        assert_eq!(report.revert_verified, Some(true));
        assert_eq!(h.store.put_attempts(), 1);
        assert_eq!(h.create_requests(), 0);
    }
}

mod revert_failure_tests {
    use super::*;

    fn failing_revert() -> Harness {
        let h = Harness::ready();
        h.store.fail_put(1, ApiError::Unauthorized("role revoked".into()));
        h
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_failure_flags_manual_intervention() {
        let h = failing_revert();
        let (report, run) = h.run().await;

        assert!(!report.reverted);
        assert!(report.manual_action_required);
        assert_eq!(report.outcome, RunOutcome::ManualInterventionRequired);
        assert_eq!(report.phase, RunPhase::FailedManualIntervention);
        assert_eq!(report.revert_error.as_ref().unwrap().kind, ErrorKind::RevertFailure);
        assert_ne!(h.record(), sample_record());

        // Raw value is retained for the operator
        assert_eq!(
            run.snapshot.unwrap().raw_value.as_deref(),
            Some(sample_record().as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_is_not_retried_automatically() {
        let h = failing_revert();
        let pipeline = h.pipeline();
        let mut run = pipeline.new_run(&sample_proposal());
        pipeline.execute(&mut run, &CancelSignal::never()).await;
        let attempts = h.store.put_attempts();

        pipeline.revert(&mut run).await;
        assert_eq!(h.store.put_attempts(), attempts);
        assert!(run.manual_action_required());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_restore_is_byte_exact() {
        let h = failing_revert();
        let id = h.gate.submit(sample_proposal()).await.unwrap();
        let pipeline = h.pipeline();
        pipeline.approve(&id, &CancelSignal::never()).await.unwrap();

        let report = pipeline.restore(&id).await.unwrap();
        assert!(report.reverted);
        assert!(!report.manual_action_required);
        assert_eq!(report.phase, RunPhase::Reported);
        assert_eq!(h.record(), sample_record());
        assert_eq!(h.audit.kinds().last(), Some(&AuditEventKind::ManualRestore));

        // Second restore is a no-op
        let attempts = h.store.put_attempts();
        pipeline.restore(&id).await.unwrap();
        assert_eq!(h.store.put_attempts(), attempts);
    }
}

mod approval_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_second_approval_does_not_rerun() {
        let h = Harness::ready();
        let id = h.gate.submit(sample_proposal()).await.unwrap();
        let pipeline = h.pipeline();
        pipeline.approve(&id, &CancelSignal::never()).await.unwrap();

        let err = pipeline.approve(&id, &CancelSignal::never()).await.unwrap_err();
        assert!(matches!(err, OptimizerError::AlreadyResumed(_)));
        assert_eq!(h.create_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_has_no_side_effects() {
        let h = Harness::ready();
        let (handle, signal) = cancellation();
        handle.cancel();
        let (report, _) = h.run_with(sample_proposal(), &signal).await;

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(report.reverted);
        assert_eq!(h.store.put_attempts(), 0);
        assert_eq!(h.create_requests(), 0);
        assert_eq!(h.record(), sample_record());
    }

    struct CancellingProvisioner {
        inner: FakeProvisioner,
        handle: CancelHandle,
    }

    #[async_trait]
    impl ResourceProvisioner for CancellingProvisioner {
        async fn create(&self, cluster_name: &str) -> ApiResult<CreateAccepted> {
            self.handle.cancel();
            self.inner.create(cluster_name).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_modify_is_ignored() {
        let (handle, signal) = cancellation();
        let h = Harness::new(
            Arc::new(CancellingProvisioner {
                inner: FakeProvisioner::accepting("j-TRIAL"),
                handle,
            }),
            FakeStatusSource::always("RUNNING"),
        );
        let (report, _) = h.run_with(sample_proposal(), &signal).await;

        assert!(signal.is_cancelled());
        assert_restored(&h, &report);
        assert_eq!(report.outcome, RunOutcome::Reverted);
        assert_eq!(report.new_resource_status, Some(ResourceStatus::Ready));
        assert!(report.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guardrails_block_before_claim() {
        let h = Harness::ready();
        let mut proposal = sample_proposal();
        proposal.cost.test_run_cost = 80.0;
        let id = h.gate.submit(proposal).await.unwrap();

        let err = h.pipeline().approve(&id, &CancelSignal::never()).await.unwrap_err();
        assert!(matches!(err, OptimizerError::Guardrail(_)));
        assert_eq!(
            h.gate.load(&id).await.unwrap().state,
            CheckpointState::AwaitingApproval
        );
        assert_eq!(h.store.put_attempts(), 0);
    }

    #[test]
    fn test_guardrail_rules() {
        let guardrails = Guardrails::default();
        assert!(guardrails.check(&sample_proposal()).is_ok());

        let mut crowded = sample_proposal();
        crowded.node_groups[1].instance_count = 30;
        assert!(matches!(
            guardrails.check(&crowded),
            Err(OptimizerError::Guardrail(_))
        ));

        let mut idle = sample_proposal();
        for rec in &mut idle.recommendations {
            rec.recommended_spec = None;
            rec.kind = crate::models::RecommendationKind::None;
        }
        assert!(matches!(
            guardrails.check(&idle),
            Err(OptimizerError::NothingToApply(_))
        ));

        let mut mixed = sample_proposal();
        let spec = mixed.recommendations[0].recommended_spec.as_mut().unwrap();
        spec.architecture = crate::models::Architecture::Graviton;
        mixed.recommendations[0].architecture_changed = true;
        assert!(matches!(
            guardrails.check(&mixed),
            Err(OptimizerError::Guardrail(_))
        ));
    }
}

mod invariant_tests {
    use super::*;

    /// Failure injection points across the whole run
    #[tokio::test(start_paused = true)]
    async fn test_every_run_reverted_or_flagged() {
        let scenarios: Vec<Box<dyn Fn() -> Harness>> = vec![
            Box::new(Harness::ready),
            Box::new(|| {
                let h = Harness::ready();
                h.store.fail_gets(vec![ApiError::Transient("reset".into()); 5]);
                h
            }),
            Box::new(|| {
                let h = Harness::ready();
                h.store.fail_put(0, ApiError::Transient("reset".into()));
                h
            }),
            Box::new(|| {
                let h = Harness::ready();
                h.store.fail_put(1, ApiError::NotFound("gone".into()));
                h
            }),
            Box::new(|| {
                Harness::new(
                    Arc::new(FakeProvisioner::responding(Err(ApiError::Unauthorized("no".into())))),
                    FakeStatusSource::always("RUNNING"),
                )
            }),
            Box::new(|| {
                Harness::new(
                    Arc::new(FakeProvisioner::accepting("j-TRIAL")),
                    FakeStatusSource::scripted(
                        vec![Err(ApiError::Unauthorized("expired".into()))],
                        "RUNNING",
                    ),
                )
            }),
        ];

        for make in scenarios {
            let h = make();
            let (report, _) = h.run().await;
            assert!(report.reverted ^ report.manual_action_required);
            if !report.manual_action_required {
                assert_eq!(h.record(), sample_record());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_twice_is_noop() {
        let h = Harness::ready();
        let pipeline = h.pipeline();
        let mut run = pipeline.new_run(&sample_proposal());
        pipeline.execute(&mut run, &CancelSignal::never()).await;
        let attempts = h.store.put_attempts();

        pipeline.revert(&mut run).await;
        pipeline.revert(&mut run).await;
        assert_eq!(h.store.put_attempts(), attempts);
        assert!(run.reverted);
        assert_eq!(h.record(), sample_record());
    }
}
