//! Cluster analysis producing a [`Proposal`]
//!
//! Steps for one cluster:
//! - resolve the cluster (by id, or the most recent transient run by name)
//! - discover its node groups and their instance ids
//! - collect CORE and TASK utilization concurrently
//! - recommend a spec per worker group and price both fleets

use crate::client::{
    paginate, ClusterInventory, ClusterQuery, PaginationConfig, RetryExecutor,
};
use crate::collector::{collect_groups, MetricsCollector};
use crate::error::{ApiError, OptimizerError, Result};
use crate::models::{ClusterSummary, NodeGroup, Proposal, SampleWindow};
use crate::pricing::CostModel;
use crate::recommend::RecommendationEngine;
use chrono::{Duration, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Which finished clusters count as transient
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransientConfig {
    /// How far back to look for created clusters
    pub lookback_hours: i64,
    /// Clusters running this long or longer are not transient
    pub max_runtime_hours: f64,
    pub states: Vec<String>,
}

impl Default for TransientConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            max_runtime_hours: 6.0,
            states: vec!["TERMINATED".to_string(), "TERMINATED_WITH_ERRORS".to_string()],
        }
    }
}

pub struct Analyzer {
    inventory: Arc<dyn ClusterInventory>,
    collector: Arc<dyn MetricsCollector>,
    engine: RecommendationEngine,
    cost: CostModel,
    retry: RetryExecutor,
    pagination: PaginationConfig,
    transient: TransientConfig,
}

impl Analyzer {
    pub fn new(
        inventory: Arc<dyn ClusterInventory>,
        collector: Arc<dyn MetricsCollector>,
        engine: RecommendationEngine,
        cost: CostModel,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            inventory,
            collector,
            engine,
            cost,
            retry,
            pagination: PaginationConfig::default(),
            transient: TransientConfig::default(),
        }
    }

    pub fn with_transient(mut self, transient: TransientConfig) -> Self {
        self.transient = transient;
        self
    }

    /// Finished clusters inside the lookback window with a short runtime, newest first
    pub async fn list_transient_clusters(&self) -> Result<Vec<ClusterSummary>> {
        let query = ClusterQuery {
            created_after: Utc::now() - Duration::hours(self.transient.lookback_hours),
            states: self.transient.states.clone(),
        };
        let inventory = self.inventory.as_ref();
        let query_ref = &query;
        let clusters = paginate(
            &self.retry,
            "inventory.list_clusters",
            &self.pagination,
            move |cursor| inventory.list_clusters_page(query_ref, cursor),
        )
        .await?;

        let listed = clusters.len();
        let mut transient: Vec<ClusterSummary> = clusters
            .into_iter()
            .filter(|c| {
                c.runtime_hours()
                    .map_or(false, |h| h < self.transient.max_runtime_hours)
            })
            .collect();
        transient.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        info!(listed, transient = transient.len(), "Listed transient clusters");
        Ok(transient)
    }

    /// Most recent transient run of `cluster_name`
    pub async fn find_cluster(&self, cluster_name: &str) -> Result<ClusterSummary> {
        self.list_transient_clusters()
            .await?
            .into_iter()
            .find(|c| c.name == cluster_name)
            .ok_or_else(|| OptimizerError::Api {
                operation: "inventory.find_cluster".to_string(),
                source: ApiError::NotFound(format!(
                    "no transient run of {} in the last {}h",
                    cluster_name, self.transient.lookback_hours
                )),
            })
    }

    pub async fn analyze(&self, cluster_name: &str, cluster_id: Option<&str>) -> Result<Proposal> {
        let summary = match cluster_id {
            Some(id) => {
                self.retry
                    .execute("inventory.describe_cluster", || {
                        self.inventory.describe_cluster(id)
                    })
                    .await?
            }
            None => self.find_cluster(cluster_name).await?,
        };

        let end = summary.ended_at.unwrap_or_else(Utc::now);
        let runtime_hours = summary.runtime_hours().unwrap_or_else(|| {
            let secs = (end - summary.created_at).num_seconds().max(0) as f64;
            (secs / 3600.0 * 10.0).round() / 10.0
        });
        let window = SampleWindow {
            start: summary.created_at,
            end,
        };

        let node_groups = self
            .retry
            .execute("inventory.list_node_groups", || {
                self.inventory.list_node_groups(&summary.id)
            })
            .await?;
        let node_groups = self.with_instances(&summary.id, node_groups).await?;
        let workers: Vec<NodeGroup> = node_groups
            .iter()
            .filter(|g| g.role.is_worker())
            .cloned()
            .collect();

        debug!(
            cluster = %summary.id,
            groups = node_groups.len(),
            workers = workers.len(),
            "Discovered node groups"
        );

        let samples = collect_groups(self.collector.as_ref(), &workers, window).await?;
        let recommendations = workers
            .iter()
            .zip(samples.iter())
            .map(|(group, sample)| self.engine.recommend(group, sample))
            .collect::<Result<Vec<_>>>()?;
        let cost = self.cost.estimate_recommendations(&recommendations, runtime_hours);

        info!(
            cluster = cluster_name,
            cluster_id = %summary.id,
            runtime_hours,
            actionable = recommendations.iter().filter(|r| r.is_actionable()).count(),
            monthly_savings = cost.monthly_savings,
            "Analysis complete"
        );

        Ok(Proposal {
            cluster_name: cluster_name.to_string(),
            cluster_id: summary.id,
            runtime_hours,
            node_groups,
            samples,
            recommendations,
            cost,
            created_at: Utc::now(),
        })
    }

    /// Fill instance ids of worker groups, listing groups concurrently
    async fn with_instances(&self, cluster_id: &str, groups: Vec<NodeGroup>) -> Result<Vec<NodeGroup>> {
        let inventory = self.inventory.as_ref();
        try_join_all(groups.into_iter().map(|mut group| async move {
            if !group.role.is_worker() {
                return Ok(group);
            }
            let group_id = group.id.clone();
            let group_ref = group_id.as_str();
            let ids = paginate(
                &self.retry,
                "inventory.list_instances",
                &self.pagination,
                move |cursor| inventory.list_instances_page(cluster_id, group_ref, cursor),
            )
            .await?;
            if !ids.is_empty() {
                group.instance_ids = ids;
            }
            if group.instance_count == 0 {
                group.instance_count = group.instance_ids.len() as u32;
            }
            Ok::<_, OptimizerError>(group)
        }))
        .await
    }
}
