//! Wiring of library components from settings

use anyhow::{Context, Result};
use rightsizer_lib::analysis::Analyzer;
use rightsizer_lib::audit::{AuditLog, FileAuditSink};
use rightsizer_lib::client::{
    ClusterApiClient, ConfigStore, FileConfigStore, GatewayClient, MetricsApiClient,
    ParameterStoreClient, ProvisionerClient, RetryExecutor,
};
use rightsizer_lib::collector::SeriesCollector;
use rightsizer_lib::observability;
use rightsizer_lib::pipeline::{
    ApprovalGate, FileCheckpointStore, StatusPoller, TrialPipeline,
};
use rightsizer_lib::pricing::{CostModel, PricingCatalog};
use rightsizer_lib::recommend::RecommendationEngine;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{RecordBackend, Settings};
use crate::output::OutputFormat;

/// Settings plus the output format chosen on the command line
pub struct App {
    pub settings: Settings,
    pub format: OutputFormat,
}

impl App {
    pub fn new(settings: Settings, format: OutputFormat) -> Self {
        Self { settings, format }
    }

    fn gateway(&self) -> Result<GatewayClient> {
        GatewayClient::new(&self.settings.gateway)
    }

    fn retry(&self) -> RetryExecutor {
        RetryExecutor::new(self.settings.retry.clone())
    }

    pub fn catalog(&self) -> Arc<PricingCatalog> {
        Arc::new(PricingCatalog::builtin())
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel::new(self.settings.cost.clone())
    }

    pub fn analyzer(&self) -> Result<Analyzer> {
        let gateway = self.gateway()?;
        let collector = SeriesCollector::new(
            Arc::new(MetricsApiClient::new(gateway.clone())),
            self.retry(),
            self.settings.collector.clone(),
        );
        Ok(Analyzer::new(
            Arc::new(ClusterApiClient::new(gateway)),
            Arc::new(collector),
            RecommendationEngine::new(self.catalog()),
            self.cost_model(),
            self.retry(),
        )
        .with_transient(self.settings.transient.clone()))
    }

    pub fn gate(&self) -> ApprovalGate {
        let dir = self.settings.checkpoint_dir();
        debug!(dir = %dir.display(), "Using checkpoint directory");
        ApprovalGate::new(Arc::new(FileCheckpointStore::new(dir)))
    }

    fn config_store(&self, gateway: &GatewayClient) -> Arc<dyn ConfigStore> {
        match self.settings.backend {
            RecordBackend::Http => Arc::new(ParameterStoreClient::new(gateway.clone())),
            RecordBackend::File => {
                let dir = self.settings.records_dir();
                debug!(dir = %dir.display(), "Using file-backed config records");
                Arc::new(FileConfigStore::new(dir))
            }
        }
    }

    pub fn pipeline(&self) -> Result<TrialPipeline> {
        let gateway = self.gateway()?;
        let clusters = Arc::new(ClusterApiClient::new(gateway.clone()));
        let poller = StatusPoller::new(
            clusters.clone(),
            clusters,
            self.retry(),
            self.settings.poller.clone(),
        );

        let audit_path = self.settings.audit_log_path();
        let sink = FileAuditSink::open(&audit_path)
            .with_context(|| format!("Failed to open audit log {}", audit_path.display()))?;

        Ok(TrialPipeline::new(
            self.config_store(&gateway),
            Arc::new(ProvisionerClient::new(gateway)),
            poller,
            self.retry(),
            self.settings.pipeline.clone(),
        )
        .with_audit(AuditLog::new().with_sink(Arc::new(sink)))
        .with_gate(self.gate()))
    }

    /// Write the metrics textfile when one is configured
    pub fn flush_metrics(&self) {
        if let Some(path) = &self.settings.metrics_textfile {
            if let Err(e) = observability::write_textfile(path) {
                warn!(path = %path.display(), error = %e, "Failed to write metrics textfile");
            }
        }
    }
}
