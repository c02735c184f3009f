//! Observability for trial runs
//!
//! Provides:
//! - Prometheus metrics (run outcomes, API retries, status polls, revert window)
//! - Text exposition written to a file for node-exporter style scraping

use anyhow::{Context, Result};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Buckets for the modify-to-revert window (in seconds)
const REVERT_WINDOW_BUCKETS: &[f64] = &[
    1.0, 5.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1200.0, 1800.0, 2400.0, 3600.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    runs_total: IntCounterVec,
    stage_failures_total: IntCounterVec,
    api_retries_total: IntCounterVec,
    status_polls_total: IntCounter,
    revert_window_seconds: Histogram,
    runs_in_progress: IntGauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            runs_total: register_int_counter_vec!(
                "rightsizer_trial_runs_total",
                "Completed trial runs by outcome",
                &["outcome"]
            )
            .expect("Failed to register trial_runs_total"),

            stage_failures_total: register_int_counter_vec!(
                "rightsizer_stage_failures_total",
                "Pipeline stage failures that routed to revert",
                &["stage"]
            )
            .expect("Failed to register stage_failures_total"),

            api_retries_total: register_int_counter_vec!(
                "rightsizer_api_retries_total",
                "External calls retried after a retryable failure",
                &["operation"]
            )
            .expect("Failed to register api_retries_total"),

            status_polls_total: register_int_counter!(
                "rightsizer_status_polls_total",
                "Status polls issued while waiting for a new cluster"
            )
            .expect("Failed to register status_polls_total"),

            revert_window_seconds: register_histogram!(
                "rightsizer_revert_window_seconds",
                "Time the modified configuration record was live",
                REVERT_WINDOW_BUCKETS.to_vec()
            )
            .expect("Failed to register revert_window_seconds"),

            runs_in_progress: register_int_gauge!(
                "rightsizer_runs_in_progress",
                "Trial runs currently executing in this process"
            )
            .expect("Failed to register runs_in_progress"),
        }
    }
}

/// Handle to the process-wide pipeline metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    /// Outcome is one of `reverted`, `manual_intervention`, `cancelled`
    pub fn inc_runs(&self, outcome: &str) {
        self.inner().runs_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_stage_failure(&self, stage: &str) {
        self.inner()
            .stage_failures_total
            .with_label_values(&[stage])
            .inc();
    }

    pub fn inc_api_retries(&self, operation: &str) {
        self.inner()
            .api_retries_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn inc_status_polls(&self) {
        self.inner().status_polls_total.inc();
    }

    pub fn observe_revert_window(&self, seconds: f64) {
        self.inner().revert_window_seconds.observe(seconds);
    }

    pub fn run_started(&self) {
        self.inner().runs_in_progress.inc();
    }

    pub fn run_finished(&self) {
        self.inner().runs_in_progress.dec();
    }
}

/// Render the default registry in text exposition format
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

/// Atomically replace `path` with the current metrics
pub fn write_textfile(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let text = gather_text()?;
    let temp_path = path.with_extension("prom.tmp");
    let mut file = std::fs::File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
    file.write_all(text.as_bytes())
        .context("Failed to write metrics")?;
    file.sync_all().context("Failed to sync metrics file")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    debug!(path = %path.display(), "Metrics textfile written");
    Ok(())
}
