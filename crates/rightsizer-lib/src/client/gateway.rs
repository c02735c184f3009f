//! HTTP adapters for the infrastructure gateway
//!
//! One adapter per external system, all sharing a [`GatewayClient`] that
//! classifies HTTP and provider failures into [`ApiError`].

use super::{
    async_trait, ApiResult, ClusterInventory, ClusterQuery, ConfigStore, CreateAccepted,
    MetricQuery, MetricsSource, Page, ResourceProvisioner, ResourceState, StatusReport,
    StatusSource,
};
use crate::error::ApiError;
use crate::models::{ClusterSummary, NodeGroup, NodeGroupRole};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Provider error codes that mean "slow down"
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
];

/// Gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the infrastructure gateway
    pub endpoint: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Shared HTTP client for all gateway adapters
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: Url,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        let base_url = Url::parse(&config.endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid gateway endpoint {}: {}", config.endpoint, e))?;
        Ok(Self { client, base_url })
    }

    /// Base URL joined with percent-encoded path segments
    fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidRequest(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request<B, T>(&self, method: Method, url: Url, body: Option<&B>) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(method = %method, url = %url, "Gateway request");
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text)
            .map_err(|e| ApiError::Unexpected(format!("undecodable response body: {}", e)))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> ApiResult<T> {
        self.request::<(), T>(Method::GET, url, None).await
    }
}

fn classify_transport(err: reqwest::Error) -> ApiError {
    if err.is_decode() {
        ApiError::Unexpected(err.to_string())
    } else {
        ApiError::Transient(err.to_string())
    }
}

/// Map an unsuccessful response onto the retry taxonomy
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let detail = format!("{} {}", status.as_u16(), body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || is_throttling_body(body) {
        return ApiError::Throttled(detail);
    }
    match status.as_u16() {
        500 | 502 | 503 | 504 => ApiError::Transient(detail),
        401 | 403 => ApiError::Unauthorized(detail),
        404 => ApiError::NotFound(detail),
        400..=499 => ApiError::InvalidRequest(detail),
        _ => ApiError::Unexpected(detail),
    }
}

fn is_throttling_body(body: &str) -> bool {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(alias = "Code", alias = "__type", alias = "error")]
        code: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { code: Some(code) }) => {
            let code = code.rsplit('#').next().unwrap_or_default();
            THROTTLING_CODES.contains(&code)
        }
        _ => false,
    }
}

// Parameter store

#[derive(Deserialize)]
struct ParameterResponse {
    value: String,
}

#[derive(Serialize)]
struct PutParameterRequest<'a> {
    value: &'a str,
    overwrite: bool,
}

/// Configuration records kept in the gateway's parameter store
#[derive(Debug, Clone)]
pub struct ParameterStoreClient {
    gateway: GatewayClient,
}

impl ParameterStoreClient {
    pub fn new(gateway: GatewayClient) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ConfigStore for ParameterStoreClient {
    async fn get(&self, name: &str) -> ApiResult<String> {
        let url = self.gateway.url(&["parameters", name])?;
        let response: ParameterResponse = self.gateway.get(url).await?;
        Ok(response.value)
    }

    async fn put(&self, name: &str, value: &str) -> ApiResult<()> {
        let url = self.gateway.url(&["parameters", name])?;
        let body = PutParameterRequest {
            value,
            overwrite: true,
        };
        let _: serde_json::Value = self.gateway.request(Method::PUT, url, Some(&body)).await?;
        Ok(())
    }
}

// Provisioner

#[derive(Serialize)]
struct CreateClusterRequest<'a> {
    cluster_name: &'a str,
    job_type: &'static str,
    request_type: &'static str,
    fifo_key: &'a str,
}

#[derive(Deserialize)]
struct CreateClusterResponse {
    #[serde(default)]
    cluster_id: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

/// Cluster creation executions
#[derive(Debug, Clone)]
pub struct ProvisionerClient {
    gateway: GatewayClient,
}

impl ProvisionerClient {
    pub fn new(gateway: GatewayClient) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ResourceProvisioner for ProvisionerClient {
    async fn create(&self, cluster_name: &str) -> ApiResult<CreateAccepted> {
        let url = self.gateway.url(&["executions", "clusters"])?;
        let body = CreateClusterRequest {
            cluster_name,
            job_type: "CLUSTER",
            request_type: "CREATE",
            fifo_key: cluster_name,
        };
        let response: CreateClusterResponse =
            self.gateway.request(Method::POST, url, Some(&body)).await?;
        Ok(CreateAccepted {
            resource_id: response.cluster_id.filter(|id| !id.is_empty()),
            request_id: response.request_id,
        })
    }
}

// Clusters

#[derive(Deserialize)]
struct ClusterDto {
    id: String,
    name: String,
    state: String,
    #[serde(default)]
    state_reason: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
}

impl From<ClusterDto> for ClusterSummary {
    fn from(dto: ClusterDto) -> Self {
        ClusterSummary {
            id: dto.id,
            name: dto.name,
            state: dto.state,
            created_at: dto.created_at,
            ended_at: dto.ended_at,
        }
    }
}

#[derive(Deserialize)]
struct ClusterListResponse {
    clusters: Vec<ClusterDto>,
    #[serde(default)]
    marker: Option<String>,
}

#[derive(Deserialize)]
struct FleetDto {
    id: String,
    role: String,
    instance_type: String,
    #[serde(default)]
    instance_count: u32,
}

#[derive(Deserialize)]
struct FleetListResponse {
    fleets: Vec<FleetDto>,
}

#[derive(Deserialize)]
struct InstanceDto {
    id: String,
}

#[derive(Deserialize)]
struct InstanceListResponse {
    instances: Vec<InstanceDto>,
    #[serde(default)]
    marker: Option<String>,
}

/// Cluster status and inventory
#[derive(Debug, Clone)]
pub struct ClusterApiClient {
    gateway: GatewayClient,
}

impl ClusterApiClient {
    pub fn new(gateway: GatewayClient) -> Self {
        Self { gateway }
    }

    async fn fetch_cluster(&self, cluster_id: &str) -> ApiResult<ClusterDto> {
        let url = self.gateway.url(&["clusters", cluster_id])?;
        self.gateway.get(url).await
    }
}

#[async_trait]
impl StatusSource for ClusterApiClient {
    async fn describe_status(&self, resource_id: &str) -> ApiResult<StatusReport> {
        let dto = self.fetch_cluster(resource_id).await?;
        Ok(StatusReport {
            state: ResourceState::from_provider(&dto.state),
            raw_state: dto.state,
            reason: dto.state_reason,
        })
    }
}

#[async_trait]
impl ClusterInventory for ClusterApiClient {
    async fn list_clusters_page(
        &self,
        query: &ClusterQuery,
        cursor: Option<String>,
    ) -> ApiResult<Page<ClusterSummary>> {
        let mut url = self.gateway.url(&["clusters"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("created_after", &query.created_after.to_rfc3339());
            if !query.states.is_empty() {
                pairs.append_pair("states", &query.states.join(","));
            }
            if let Some(marker) = &cursor {
                pairs.append_pair("marker", marker);
            }
        }
        let response: ClusterListResponse = self.gateway.get(url).await?;
        Ok(Page {
            items: response.clusters.into_iter().map(Into::into).collect(),
            next: response.marker,
        })
    }

    async fn describe_cluster(&self, cluster_id: &str) -> ApiResult<ClusterSummary> {
        Ok(self.fetch_cluster(cluster_id).await?.into())
    }

    async fn list_node_groups(&self, cluster_id: &str) -> ApiResult<Vec<NodeGroup>> {
        let url = self.gateway.url(&["clusters", cluster_id, "fleets"])?;
        let response: FleetListResponse = self.gateway.get(url).await?;
        let groups = response
            .fleets
            .into_iter()
            .filter_map(|fleet| match NodeGroupRole::parse(&fleet.role) {
                Some(role) => Some(NodeGroup {
                    id: fleet.id,
                    role,
                    instance_type: fleet.instance_type,
                    instance_count: fleet.instance_count,
                    instance_ids: Vec::new(),
                }),
                None => {
                    warn!(cluster_id, fleet = %fleet.id, role = %fleet.role, "Skipping fleet with unknown role");
                    None
                }
            })
            .collect();
        Ok(groups)
    }

    async fn list_instances_page(
        &self,
        cluster_id: &str,
        node_group_id: &str,
        cursor: Option<String>,
    ) -> ApiResult<Page<String>> {
        let mut url = self.gateway.url(&["clusters", cluster_id, "instances"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("fleet_id", node_group_id);
            if let Some(marker) = &cursor {
                pairs.append_pair("marker", marker);
            }
        }
        let response: InstanceListResponse = self.gateway.get(url).await?;
        Ok(Page {
            items: response.instances.into_iter().map(|i| i.id).collect(),
            next: response.marker,
        })
    }
}

// Metrics

#[derive(Deserialize)]
struct Datapoint {
    timestamp: DateTime<Utc>,
    value: f64,
}

#[derive(Deserialize)]
struct MetricQueryResponse {
    #[serde(default)]
    datapoints: Vec<Datapoint>,
}

/// Utilization time series
#[derive(Debug, Clone)]
pub struct MetricsApiClient {
    gateway: GatewayClient,
}

impl MetricsApiClient {
    pub fn new(gateway: GatewayClient) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl MetricsSource for MetricsApiClient {
    async fn series(&self, query: &MetricQuery) -> ApiResult<Vec<f64>> {
        let url = self.gateway.url(&["metrics", "query"])?;
        let mut response: MetricQueryResponse =
            self.gateway.request(Method::POST, url, Some(query)).await?;
        response.datapoints.sort_by_key(|d| d.timestamp);
        Ok(response.datapoints.into_iter().map(|d| d.value).collect())
    }
}
