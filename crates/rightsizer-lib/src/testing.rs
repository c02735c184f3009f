//! In-memory fakes for the external-call traits

use crate::client::{
    async_trait, ApiResult, ClusterInventory, ClusterQuery, ConfigStore, CreateAccepted,
    MetricQuery, MetricsSource, Page, ResourceProvisioner, ResourceState, StatusReport,
    StatusSource,
};
use crate::error::ApiError;
use crate::models::{
    ClusterSummary, NodeGroup, NodeGroupRole, Proposal, SampleWindow, UtilizationSample,
};
use crate::pricing::{CostModel, PricingCatalog};
use crate::recommend::RecommendationEngine;
use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const CLUSTER_NAME: &str = "nightly-etl";
pub const RECORD_NAME: &str = "/application/cluster-config/prod/nightly-etl";

/// Config record with a JSON-encoded `Instances` field, pretty printed
pub fn sample_record() -> String {
    let instances = serde_json::json!({
        "InstanceFleets": [
            {
                "Name": "Primary",
                "InstanceFleetType": "MASTER",
                "TargetOnDemandCapacity": 1,
                "InstanceTypeConfigs": [{"InstanceType": "m5.xlarge"}]
            },
            {
                "Name": "Core",
                "InstanceFleetType": "CORE",
                "TargetOnDemandCapacity": 10,
                "InstanceTypeConfigs": [
                    {
                        "InstanceType": "r5.4xlarge",
                        "BidPrice": "0.50",
                        "EbsConfiguration": {"EbsBlockDeviceConfigs": [{"VolumeSpecification": {"SizeInGB": 256, "VolumeType": "gp3"}}]}
                    },
                    {"InstanceType": "r5.8xlarge"}
                ]
            },
            {
                "Name": "Task",
                "InstanceFleetType": "TASK",
                "TargetSpotCapacity": 4,
                "InstanceTypeConfigs": [{"InstanceType": "m5.4xlarge"}]
            }
        ],
        "Ec2SubnetIds": ["subnet-0a1b2c"]
    });
    let record = serde_json::json!({
        "Name": CLUSTER_NAME,
        "ReleaseLabel": "emr-6.15.0",
        "Instances": instances.to_string(),
        "GravitonAmi": false,
        "BootstrapActions": [{"Name": "install-deps", "Path": "s3://bootstrap/install.sh"}]
    });
    let mut raw = serde_json::to_string_pretty(&record).unwrap();
    raw.push('\n');
    raw
}

pub fn window() -> SampleWindow {
    let end = Utc::now();
    SampleWindow {
        start: end - Duration::minutes(192),
        end,
    }
}

pub fn core_group() -> NodeGroup {
    NodeGroup {
        id: "if-core".into(),
        role: NodeGroupRole::Core,
        instance_type: "r5.4xlarge".into(),
        instance_count: 10,
        instance_ids: vec![],
    }
}

pub fn task_group() -> NodeGroup {
    NodeGroup {
        id: "if-task".into(),
        role: NodeGroupRole::Task,
        instance_type: "m5.4xlarge".into(),
        instance_count: 4,
        instance_ids: vec![],
    }
}

pub fn master_group() -> NodeGroup {
    NodeGroup {
        id: "if-master".into(),
        role: NodeGroupRole::Master,
        instance_type: "m5.xlarge".into(),
        instance_count: 1,
        instance_ids: vec![],
    }
}

/// Proposal resizing CORE r5.4xlarge -> r5.2xlarge and TASK m5.4xlarge -> m5.xlarge
pub fn sample_proposal() -> Proposal {
    let engine = RecommendationEngine::new(Arc::new(PricingCatalog::builtin()));
    let w = window();
    let core = core_group();
    let task = task_group();
    let samples = vec![
        UtilizationSample::new(&core.id, 18.0, 32.0, 24.0, 39.0, w).unwrap(),
        UtilizationSample::new(&task.id, 10.0, 20.0, 10.0, 20.0, w).unwrap(),
    ];
    let recommendations = vec![
        engine.recommend(&core, &samples[0]).unwrap(),
        engine.recommend(&task, &samples[1]).unwrap(),
    ];
    let cost = CostModel::default().estimate_recommendations(&recommendations, 3.2);
    Proposal {
        cluster_name: CLUSTER_NAME.into(),
        cluster_id: "j-PREVIOUS".into(),
        runtime_hours: 3.2,
        node_groups: vec![master_group(), core, task],
        samples,
        recommendations,
        cost,
        created_at: Utc::now(),
    }
}

/// Config store with scripted failures
#[derive(Default)]
pub struct FakeConfigStore {
    records: Mutex<HashMap<String, String>>,
    get_failures: Mutex<VecDeque<ApiError>>,
    put_failures: Mutex<HashMap<usize, ApiError>>,
    puts: Mutex<Vec<(String, String)>>,
}

impl FakeConfigStore {
    pub fn with_record(name: &str, value: &str) -> Self {
        let store = Self::default();
        store
            .records
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        store
    }

    /// Overwrite a record without counting it as a put
    pub fn set_value(&self, name: &str, value: &str) {
        self.records
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.records.lock().unwrap().get(name).cloned()
    }

    /// Fail the next get calls in order
    pub fn fail_gets(&self, errors: Vec<ApiError>) {
        self.get_failures.lock().unwrap().extend(errors);
    }

    /// Fail the put with this zero-based index (counting attempts)
    pub fn fail_put(&self, index: usize, error: ApiError) {
        self.put_failures.lock().unwrap().insert(index, error);
    }

    /// Every put attempt, successful or not
    pub fn put_attempts(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn written_values(&self) -> Vec<String> {
        self.puts.lock().unwrap().iter().map(|(_, v)| v.clone()).collect()
    }
}

#[async_trait]
impl ConfigStore for FakeConfigStore {
    async fn get(&self, name: &str) -> ApiResult<String> {
        if let Some(err) = self.get_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.value(name)
            .ok_or_else(|| ApiError::NotFound(format!("parameter {}", name)))
    }

    async fn put(&self, name: &str, value: &str) -> ApiResult<()> {
        let index = {
            let mut puts = self.puts.lock().unwrap();
            puts.push((name.to_string(), value.to_string()));
            puts.len() - 1
        };
        if let Some(err) = self.put_failures.lock().unwrap().remove(&index) {
            return Err(err);
        }
        self.records
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

pub struct FakeProvisioner {
    response: Mutex<ApiResult<CreateAccepted>>,
    calls: AtomicU32,
}

impl FakeProvisioner {
    pub fn accepting(resource_id: &str) -> Self {
        Self::responding(Ok(CreateAccepted {
            resource_id: Some(resource_id.to_string()),
            request_id: Some("req-1".to_string()),
        }))
    }

    pub fn responding(response: ApiResult<CreateAccepted>) -> Self {
        Self {
            response: Mutex::new(response),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProvisioner for FakeProvisioner {
    async fn create(&self, _cluster_name: &str) -> ApiResult<CreateAccepted> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone()
    }
}

pub fn report(raw_state: &str) -> StatusReport {
    StatusReport {
        state: ResourceState::from_provider(raw_state),
        raw_state: raw_state.to_string(),
        reason: None,
    }
}

/// Replays scripted status responses, then repeats `fallback`
pub struct FakeStatusSource {
    script: Mutex<VecDeque<ApiResult<StatusReport>>>,
    fallback: StatusReport,
    polls: AtomicU32,
}

impl FakeStatusSource {
    pub fn scripted(script: Vec<ApiResult<StatusReport>>, fallback: &str) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: report(fallback),
            polls: AtomicU32::new(0),
        }
    }

    pub fn always(raw_state: &str) -> Self {
        Self::scripted(vec![], raw_state)
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for FakeStatusSource {
    async fn describe_status(&self, _resource_id: &str) -> ApiResult<StatusReport> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(next) => next,
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Inventory serving fixed data in pages of `page_size`
pub struct FakeInventory {
    pub clusters: Mutex<Vec<ClusterSummary>>,
    pub node_groups: HashMap<String, Vec<NodeGroup>>,
    pub instances: HashMap<(String, String), Vec<String>>,
    pub page_size: usize,
}

impl Default for FakeInventory {
    fn default() -> Self {
        Self {
            clusters: Mutex::new(Vec::new()),
            node_groups: HashMap::new(),
            instances: HashMap::new(),
            page_size: 2,
        }
    }
}

impl FakeInventory {
    pub fn add_cluster(&self, summary: ClusterSummary) {
        self.clusters.lock().unwrap().push(summary);
    }

    fn page<T: Clone>(&self, items: &[T], cursor: Option<String>) -> ApiResult<Page<T>> {
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| ApiError::InvalidRequest(format!("bad marker {}", c)))?,
            None => 0,
        };
        let end = (start + self.page_size).min(items.len());
        Ok(Page {
            items: items.get(start..end).map(|s| s.to_vec()).unwrap_or_default(),
            next: (end < items.len()).then(|| end.to_string()),
        })
    }
}

#[async_trait]
impl ClusterInventory for FakeInventory {
    async fn list_clusters_page(
        &self,
        query: &ClusterQuery,
        cursor: Option<String>,
    ) -> ApiResult<Page<ClusterSummary>> {
        let matching: Vec<ClusterSummary> = self
            .clusters
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.created_at >= query.created_after)
            .filter(|c| query.states.is_empty() || query.states.contains(&c.state))
            .cloned()
            .collect();
        self.page(&matching, cursor)
    }

    async fn describe_cluster(&self, cluster_id: &str) -> ApiResult<ClusterSummary> {
        self.clusters
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == cluster_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("cluster {}", cluster_id)))
    }

    async fn list_node_groups(&self, cluster_id: &str) -> ApiResult<Vec<NodeGroup>> {
        self.node_groups
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("cluster {}", cluster_id)))
    }

    async fn list_instances_page(
        &self,
        cluster_id: &str,
        node_group_id: &str,
        cursor: Option<String>,
    ) -> ApiResult<Page<String>> {
        let ids = self
            .instances
            .get(&(cluster_id.to_string(), node_group_id.to_string()))
            .cloned()
            .unwrap_or_default();
        self.page(&ids, cursor)
    }
}

/// Metrics keyed by (metric name, instance id)
#[derive(Default)]
pub struct FakeMetricsSource {
    pub series: HashMap<(String, String), Vec<f64>>,
}

impl FakeMetricsSource {
    pub fn set(&mut self, metric: &str, instance_id: &str, values: Vec<f64>) {
        self.series
            .insert((metric.to_string(), instance_id.to_string()), values);
    }
}

#[async_trait]
impl MetricsSource for FakeMetricsSource {
    async fn series(&self, query: &MetricQuery) -> ApiResult<Vec<f64>> {
        Ok(self
            .series
            .get(&(query.metric.clone(), query.instance_id.clone()))
            .cloned()
            .unwrap_or_default())
    }
}
