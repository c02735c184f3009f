//! Bounded status polling for the trial cluster

use super::run::ResourceStatus;
use crate::client::{
    paginate, ClusterInventory, ClusterQuery, PaginationConfig, ResourceState, RetryExecutor,
    StatusReport, StatusSource,
};
use crate::error::Result;
use crate::observability::PipelineMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay between polls in seconds
    pub interval_secs: u64,
    /// Total wait before giving up, in seconds
    pub timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 30 * 60,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_polls(&self) -> u64 {
        self.timeout_secs / self.interval_secs.max(1)
    }
}

/// Result of waiting on a cluster
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub status: ResourceStatus,
    pub last_report: Option<StatusReport>,
    pub polls: u32,
    pub waited: Duration,
}

/// Shared deadline for locating and then waiting on one cluster
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    started: Instant,
    deadline: Instant,
}

impl PollBudget {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

pub struct StatusPoller {
    status: Arc<dyn StatusSource>,
    inventory: Arc<dyn ClusterInventory>,
    retry: RetryExecutor,
    config: PollerConfig,
    metrics: PipelineMetrics,
}

impl StatusPoller {
    pub fn new(
        status: Arc<dyn StatusSource>,
        inventory: Arc<dyn ClusterInventory>,
        retry: RetryExecutor,
        config: PollerConfig,
    ) -> Self {
        Self {
            status,
            inventory,
            retry,
            config,
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn budget(&self) -> PollBudget {
        let started = Instant::now();
        PollBudget {
            started,
            deadline: started + self.config.timeout(),
        }
    }

    /// Sleep one interval, or return false when the budget is exhausted
    async fn pause(&self, budget: &PollBudget) -> bool {
        let now = Instant::now();
        if now + self.config.interval() >= budget.deadline {
            tokio::time::sleep_until(budget.deadline).await;
            return false;
        }
        tokio::time::sleep(self.config.interval()).await;
        true
    }

    /// Find the id of the newest cluster named `cluster_name` created after `since`
    pub async fn locate(
        &self,
        cluster_name: &str,
        since: DateTime<Utc>,
        budget: &PollBudget,
    ) -> Result<Option<String>> {
        let query = ClusterQuery {
            created_after: since,
            states: Vec::new(),
        };
        let pagination = PaginationConfig::default();

        loop {
            let inventory = self.inventory.as_ref();
            let query_ref = &query;
            let clusters = paginate(
                &self.retry,
                "inventory.list_clusters",
                &pagination,
                move |cursor| inventory.list_clusters_page(query_ref, cursor),
            )
            .await?;

            if let Some(found) = clusters
                .into_iter()
                .filter(|c| c.name == cluster_name)
                .max_by_key(|c| c.created_at)
            {
                info!(cluster = cluster_name, cluster_id = %found.id, "Located new cluster");
                return Ok(Some(found.id));
            }

            debug!(cluster = cluster_name, "New cluster not listed yet");
            if !self.pause(budget).await {
                warn!(cluster = cluster_name, "Gave up locating new cluster");
                return Ok(None);
            }
        }
    }

    /// Poll until the cluster is ready or failed, or the budget runs out.
    ///
    /// `on_change` sees every report whose provider state differs from the
    /// previous one. Retry exhaustion on a poll surfaces as an error.
    pub async fn wait<F>(&self, resource_id: &str, budget: &PollBudget, mut on_change: F) -> Result<PollOutcome>
    where
        F: FnMut(&StatusReport),
    {
        let mut polls = 0u32;
        let mut last: Option<StatusReport> = None;

        loop {
            let report = self
                .retry
                .execute("status.describe", || self.status.describe_status(resource_id))
                .await?;
            polls += 1;
            self.metrics.inc_status_polls();

            if last.as_ref().map(|r| &r.raw_state) != Some(&report.raw_state) {
                info!(
                    resource_id,
                    state = %report.raw_state,
                    reason = ?report.reason,
                    poll = polls,
                    "Cluster state changed"
                );
                on_change(&report);
            }

            let status = match report.state {
                ResourceState::Ready => Some(ResourceStatus::Ready),
                ResourceState::Failed => Some(ResourceStatus::Failed),
                ResourceState::Pending => None,
            };
            last = Some(report);

            if let Some(status) = status {
                return Ok(PollOutcome {
                    status,
                    last_report: last,
                    polls,
                    waited: budget.elapsed(),
                });
            }

            if !self.pause(budget).await {
                warn!(resource_id, polls, "Cluster did not settle within the poll bound");
                return Ok(PollOutcome {
                    status: ResourceStatus::TimedOut,
                    last_report: last,
                    polls,
                    waited: budget.elapsed(),
                });
            }
        }
    }
}
