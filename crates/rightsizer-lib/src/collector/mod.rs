//! Utilization collection for node groups
//!
//! Pulls per-instance CPU and memory series and reduces them to a
//! [`UtilizationSample`] (mean and P95) per node group. Independent node
//! groups are collected concurrently.

mod stats;

pub use stats::{mean, percentile, summarize};

use crate::client::{async_trait, MetricQuery, MetricsSource, RetryExecutor};
use crate::error::Result;
use crate::models::{NodeGroup, SampleWindow, UtilizationSample};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Where utilization series live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub cpu_namespace: String,
    pub cpu_metric: String,
    pub memory_namespace: String,
    pub memory_metric: String,
    /// Aggregation period of each datapoint
    pub period_secs: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            cpu_namespace: "AWS/EC2".to_string(),
            cpu_metric: "CPUUtilization".to_string(),
            memory_namespace: "CWAgent".to_string(),
            memory_metric: "mem_used_percent".to_string(),
            period_secs: 300,
        }
    }
}

/// Trait for utilization collection implementations
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Aggregate utilization of one node group over `window`
    async fn collect(&self, group: &NodeGroup, window: SampleWindow) -> Result<UtilizationSample>;
}

/// Collect several node groups concurrently, preserving input order
pub async fn collect_groups(
    collector: &dyn MetricsCollector,
    groups: &[NodeGroup],
    window: SampleWindow,
) -> Result<Vec<UtilizationSample>> {
    try_join_all(groups.iter().map(|group| collector.collect(group, window))).await
}

/// Collector backed by a time-series [`MetricsSource`]
pub struct SeriesCollector {
    source: Arc<dyn MetricsSource>,
    retry: RetryExecutor,
    config: CollectorConfig,
}

impl SeriesCollector {
    pub fn new(source: Arc<dyn MetricsSource>, retry: RetryExecutor, config: CollectorConfig) -> Self {
        Self {
            source,
            retry,
            config,
        }
    }

    async fn fetch(
        &self,
        namespace: &str,
        metric: &str,
        instance_ids: &[String],
        window: SampleWindow,
    ) -> Result<Vec<f64>> {
        let mut values = Vec::new();
        for instance_id in instance_ids {
            let query = MetricQuery {
                namespace: namespace.to_string(),
                metric: metric.to_string(),
                instance_id: instance_id.clone(),
                start: window.start,
                end: window.end,
                period_secs: self.config.period_secs,
            };
            let series = self
                .retry
                .execute("metrics.series", || self.source.series(&query))
                .await?;
            values.extend(series);
        }
        Ok(values)
    }
}

#[async_trait]
impl MetricsCollector for SeriesCollector {
    async fn collect(&self, group: &NodeGroup, window: SampleWindow) -> Result<UtilizationSample> {
        let cpu = self
            .fetch(&self.config.cpu_namespace, &self.config.cpu_metric, &group.instance_ids, window)
            .await?;
        let mem = self
            .fetch(
                &self.config.memory_namespace,
                &self.config.memory_metric,
                &group.instance_ids,
                window,
            )
            .await?;

        if cpu.is_empty() || mem.is_empty() {
            warn!(
                node_group = %group.id,
                cpu_datapoints = cpu.len(),
                mem_datapoints = mem.len(),
                "Missing utilization datapoints, treating as idle"
            );
        }

        let (cpu_avg, cpu_p95) = summarize(&cpu);
        let (mem_avg, mem_p95) = summarize(&mem);

        info!(
            node_group = %group.id,
            role = %group.role,
            instances = group.instance_ids.len(),
            cpu_avg,
            cpu_p95,
            mem_avg,
            mem_p95,
            "Collected utilization"
        );

        Ok(
            UtilizationSample::new(&group.id, cpu_avg, cpu_p95, mem_avg, mem_p95, window)?
                .with_datapoints(cpu.len().min(mem.len())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiResult;
    use crate::error::ApiError;
    use crate::models::NodeGroupRole;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSeries {
        by_key: HashMap<(String, String), Vec<f64>>,
        throttle_first: AtomicU32,
    }

    #[async_trait]
    impl MetricsSource for FixedSeries {
        async fn series(&self, query: &MetricQuery) -> ApiResult<Vec<f64>> {
            if self.throttle_first.load(Ordering::SeqCst) > 0 {
                self.throttle_first.fetch_sub(1, Ordering::SeqCst);
                return Err(ApiError::Throttled("Throttling".into()));
            }
            Ok(self
                .by_key
                .get(&(query.metric.clone(), query.instance_id.clone()))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn group(id: &str, instances: &[&str]) -> NodeGroup {
        NodeGroup {
            id: id.into(),
            role: NodeGroupRole::Core,
            instance_type: "r5.4xlarge".into(),
            instance_count: instances.len() as u32,
            instance_ids: instances.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn window() -> SampleWindow {
        let now = Utc::now();
        SampleWindow {
            start: now - chrono::Duration::hours(2),
            end: now,
        }
    }

    fn source(throttle_first: u32) -> Arc<FixedSeries> {
        let mut by_key = HashMap::new();
        by_key.insert(("CPUUtilization".into(), "i-1".into()), vec![10.0, 20.0]);
        by_key.insert(("CPUUtilization".into(), "i-2".into()), vec![30.0, 40.0]);
        by_key.insert(("mem_used_percent".into(), "i-1".into()), vec![50.0, 50.0]);
        by_key.insert(("mem_used_percent".into(), "i-2".into()), vec![50.0, 50.0]);
        Arc::new(FixedSeries {
            by_key,
            throttle_first: AtomicU32::new(throttle_first),
        })
    }

    #[tokio::test]
    async fn test_collect_concatenates_instances() {
        let collector = SeriesCollector::new(source(0), RetryExecutor::default(), CollectorConfig::default());
        let sample = collector.collect(&group("ig-core", &["i-1", "i-2"]), window()).await.unwrap();

        assert_eq!(sample.node_group_id, "ig-core");
        assert_eq!(sample.cpu_avg, 25.0);
        assert_eq!(sample.cpu_p95, 38.5);
        assert_eq!(sample.mem_avg, 50.0);
        assert_eq!(sample.mem_p95, 50.0);
        assert_eq!(sample.datapoints, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_retries_throttled_queries() {
        let collector = SeriesCollector::new(source(2), RetryExecutor::default(), CollectorConfig::default());
        let sample = collector.collect(&group("ig-core", &["i-1"]), window()).await.unwrap();
        assert_eq!(sample.cpu_avg, 15.0);
    }

    #[tokio::test]
    async fn test_group_without_data_is_idle() {
        let collector = SeriesCollector::new(source(0), RetryExecutor::default(), CollectorConfig::default());
        let sample = collector.collect(&group("ig-task", &["i-9"]), window()).await.unwrap();
        assert_eq!(sample.peak(), 0.0);
        assert_eq!(sample.datapoints, 0);
    }

    #[tokio::test]
    async fn test_collect_groups_preserves_order() {
        let collector = SeriesCollector::new(source(0), RetryExecutor::default(), CollectorConfig::default());
        let groups = vec![group("ig-core", &["i-1"]), group("ig-task", &["i-2"])];
        let samples = collect_groups(&collector, &groups, window()).await.unwrap();
        assert_eq!(samples[0].node_group_id, "ig-core");
        assert_eq!(samples[1].node_group_id, "ig-task");
        assert_eq!(samples[1].cpu_avg, 35.0);
    }
}
