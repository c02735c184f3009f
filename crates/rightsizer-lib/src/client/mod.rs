//! External-call layer
//!
//! This module provides:
//! - Typed interfaces for every external system the optimizer talks to
//! - Retry with exponential backoff and full jitter
//! - Cursor-based pagination retried per page
//! - HTTP adapters for the infrastructure gateway and a file-backed config store

mod file_store;
mod gateway;
mod pagination;
mod retry;

pub use file_store::FileConfigStore;
pub use gateway::{
    ClusterApiClient, GatewayClient, GatewayConfig, MetricsApiClient, ParameterStoreClient,
    ProvisionerClient,
};
pub use pagination::{paginate, PaginationConfig};
pub use retry::{RetryConfig, RetryExecutor};

pub use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{ClusterSummary, NodeGroup};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Named configuration record storage
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the exact stored value
    async fn get(&self, name: &str) -> ApiResult<String>;

    /// Overwrite the stored value
    async fn put(&self, name: &str, value: &str) -> ApiResult<()>;
}

/// Acknowledgement of an asynchronous create request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccepted {
    /// Cluster id when the provisioner already knows it
    pub resource_id: Option<String>,
    /// Provisioner-side request id
    pub request_id: Option<String>,
}

/// Triggers cluster creation from a named configuration record
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    async fn create(&self, cluster_name: &str) -> ApiResult<CreateAccepted>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Pending,
    Ready,
    Failed,
}

impl ResourceState {
    /// Map a provider cluster state onto the readiness contract
    pub fn from_provider(state: &str) -> Self {
        match state {
            "WAITING" | "RUNNING" => ResourceState::Ready,
            "TERMINATING" | "TERMINATED" | "TERMINATED_WITH_ERRORS" => ResourceState::Failed,
            _ => ResourceState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: ResourceState,
    /// Provider state string, e.g. `BOOTSTRAPPING`
    pub raw_state: String,
    pub reason: Option<String>,
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn describe_status(&self, resource_id: &str) -> ApiResult<StatusReport>;
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Filter for cluster listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterQuery {
    pub created_after: DateTime<Utc>,
    pub states: Vec<String>,
}

/// Read-only view of the provider's clusters
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    async fn list_clusters_page(
        &self,
        query: &ClusterQuery,
        cursor: Option<String>,
    ) -> ApiResult<Page<ClusterSummary>>;

    async fn describe_cluster(&self, cluster_id: &str) -> ApiResult<ClusterSummary>;

    async fn list_node_groups(&self, cluster_id: &str) -> ApiResult<Vec<NodeGroup>>;

    async fn list_instances_page(
        &self,
        cluster_id: &str,
        node_group_id: &str,
        cursor: Option<String>,
    ) -> ApiResult<Page<String>>;
}

/// Time-series query for one metric on one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric: String,
    pub instance_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period_secs: u32,
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Period averages ordered by timestamp
    async fn series(&self, query: &MetricQuery) -> ApiResult<Vec<f64>>;
}
