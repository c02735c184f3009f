//! Core data models for right-sizing analysis and trial runs

use crate::error::{OptimizerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// CPU architecture of an instance family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Graviton,
    X86,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Graviton => f.write_str("arm64"),
            Architecture::X86 => f.write_str("x86_64"),
        }
    }
}

/// One purchasable instance specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Provider identifier, e.g. `r5.2xlarge`
    pub instance_type: String,
    pub family: String,
    pub size: String,
    pub vcpu: u32,
    pub memory_gib: f64,
    pub architecture: Architecture,
    /// On-demand price in USD per hour, always positive
    pub hourly_price: f64,
}

/// Role of a fleet inside a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeGroupRole {
    Master,
    Core,
    Task,
}

impl NodeGroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeGroupRole::Master => "MASTER",
            NodeGroupRole::Core => "CORE",
            NodeGroupRole::Task => "TASK",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "MASTER" | "PRIMARY" => Some(NodeGroupRole::Master),
            "CORE" => Some(NodeGroupRole::Core),
            "TASK" => Some(NodeGroupRole::Task),
            _ => None,
        }
    }

    /// Worker roles are the only ones the trial may resize
    pub fn is_worker(&self) -> bool {
        matches!(self, NodeGroupRole::Core | NodeGroupRole::Task)
    }
}

impl fmt::Display for NodeGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node group (fleet) of a cluster as discovered from the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub id: String,
    pub role: NodeGroupRole,
    pub instance_type: String,
    pub instance_count: u32,
    #[serde(default)]
    pub instance_ids: Vec<String>,
}

/// Time range a utilization sample covers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Aggregated utilization for one node group, all values in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub node_group_id: String,
    pub cpu_avg: f64,
    pub cpu_p95: f64,
    pub mem_avg: f64,
    pub mem_p95: f64,
    pub window: SampleWindow,
    /// Number of datapoints behind the aggregates
    #[serde(default)]
    pub datapoints: usize,
}

impl UtilizationSample {
    /// Build a sample, rejecting values outside [0,100] or a P95 below its mean
    pub fn new(
        node_group_id: impl Into<String>,
        cpu_avg: f64,
        cpu_p95: f64,
        mem_avg: f64,
        mem_p95: f64,
        window: SampleWindow,
    ) -> Result<Self> {
        let sample = Self {
            node_group_id: node_group_id.into(),
            cpu_avg,
            cpu_p95,
            mem_avg,
            mem_p95,
            window,
            datapoints: 0,
        };
        sample.validate()?;
        Ok(sample)
    }

    pub fn with_datapoints(mut self, datapoints: usize) -> Self {
        self.datapoints = datapoints;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cpu_avg", self.cpu_avg),
            ("cpu_p95", self.cpu_p95),
            ("mem_avg", self.mem_avg),
            ("mem_p95", self.mem_p95),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(OptimizerError::InvalidSample(format!(
                    "{} for {} is {}, expected a percentage in [0, 100]",
                    name, self.node_group_id, value
                )));
            }
        }
        if self.cpu_p95 < self.cpu_avg || self.mem_p95 < self.mem_avg {
            return Err(OptimizerError::InvalidSample(format!(
                "p95 below average for {}",
                self.node_group_id
            )));
        }
        Ok(())
    }

    pub fn avg(&self) -> f64 {
        self.cpu_avg.max(self.mem_avg)
    }

    pub fn peak(&self) -> f64 {
        self.cpu_p95.max(self.mem_p95)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingClassification {
    HeavilyOversized,
    ModeratelyOversized,
    RightSized,
    Undersized,
}

impl SizingClassification {
    pub fn is_oversized(&self) -> bool {
        matches!(
            self,
            SizingClassification::HeavilyOversized | SizingClassification::ModeratelyOversized
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizingClassification::HeavilyOversized => "heavily_oversized",
            SizingClassification::ModeratelyOversized => "moderately_oversized",
            SizingClassification::RightSized => "right_sized",
            SizingClassification::Undersized => "undersized",
        }
    }
}

impl fmt::Display for SizingClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadProfile {
    CpuHeavy,
    MemoryHeavy,
    Balanced,
}

impl fmt::Display for WorkloadProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadProfile::CpuHeavy => f.write_str("cpu_heavy"),
            WorkloadProfile::MemoryHeavy => f.write_str("memory_heavy"),
            WorkloadProfile::Balanced => f.write_str("balanced"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    SameFamily,
    CrossFamily,
    None,
}

impl fmt::Display for RecommendationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendationKind::SameFamily => f.write_str("same_family"),
            RecommendationKind::CrossFamily => f.write_str("cross_family"),
            RecommendationKind::None => f.write_str("none"),
        }
    }
}

/// Resource dimension of a node group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Cpu,
    Memory,
}

/// Per-dimension view of the sizing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionAnalysis {
    pub cpu: SizingClassification,
    pub memory: SizingClassification,
    /// CPU and memory sit far apart, one of them limits any downsizing
    pub asymmetric: bool,
    pub constraining: Dimension,
}

/// Resources a replacement spec must provide
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequiredResources {
    pub vcpu: f64,
    pub memory_gib: f64,
}

/// Recommendation for one node group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub node_group_id: String,
    pub role: NodeGroupRole,
    pub instance_count: u32,
    pub current_spec: InstanceSpec,
    pub recommended_spec: Option<InstanceSpec>,
    pub classification: SizingClassification,
    pub profile: WorkloadProfile,
    pub kind: RecommendationKind,
    pub architecture_changed: bool,
    pub savings_percent: f64,
    pub required: RequiredResources,
    pub dimensions: DimensionAnalysis,
    /// Provisioned / required, for vCPU and memory
    pub overprovisioning: Option<(f64, f64)>,
    #[serde(default)]
    pub alternatives: Vec<InstanceSpec>,
    pub explanation: Option<String>,
}

impl Recommendation {
    /// Spec the node group runs with once the recommendation is applied
    pub fn effective_spec(&self) -> &InstanceSpec {
        self.recommended_spec.as_ref().unwrap_or(&self.current_spec)
    }

    pub fn is_actionable(&self) -> bool {
        self.kind != RecommendationKind::None && self.recommended_spec.is_some()
    }
}

/// One line of a fleet composition used for costing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetLine {
    pub role: NodeGroupRole,
    pub spec: InstanceSpec,
    pub count: u32,
}

/// Cost comparison of the current and recommended fleets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub runtime_hours: f64,
    pub runs_per_month: u32,
    pub per_run_current: f64,
    pub per_run_recommended: f64,
    pub monthly_savings: f64,
    pub test_run_cost: f64,
}

impl CostEstimate {
    pub fn per_run_savings(&self) -> f64 {
        self.per_run_current - self.per_run_recommended
    }

    pub fn savings_percent(&self) -> f64 {
        if self.per_run_current > 0.0 {
            self.per_run_savings() / self.per_run_current * 100.0
        } else {
            0.0
        }
    }
}

/// Finished analysis awaiting a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub cluster_name: String,
    pub cluster_id: String,
    pub runtime_hours: f64,
    pub node_groups: Vec<NodeGroup>,
    pub samples: Vec<UtilizationSample>,
    pub recommendations: Vec<Recommendation>,
    pub cost: CostEstimate,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    pub fn actionable(&self) -> impl Iterator<Item = &Recommendation> {
        self.recommendations.iter().filter(|r| r.is_actionable())
    }

    pub fn has_actionable(&self) -> bool {
        self.actionable().next().is_some()
    }

    /// Total CORE and TASK node count
    pub fn worker_instances(&self) -> u32 {
        self.node_groups
            .iter()
            .filter(|g| g.role.is_worker())
            .map(|g| g.instance_count)
            .sum()
    }
}

/// A past cluster as listed by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: String,
    pub name: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ClusterSummary {
    /// Runtime in hours rounded to 0.1, None while still running
    pub fn runtime_hours(&self) -> Option<f64> {
        let ended = self.ended_at?;
        let secs = (ended - self.created_at).num_seconds().max(0) as f64;
        Some((secs / 3600.0 * 10.0).round() / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window() -> SampleWindow {
        let end = Utc::now();
        SampleWindow {
            start: end - Duration::hours(2),
            end,
        }
    }

    #[test]
    fn test_sample_rejects_out_of_range() {
        assert!(UtilizationSample::new("core", 101.0, 101.0, 10.0, 10.0, window()).is_err());
        assert!(UtilizationSample::new("core", -1.0, 10.0, 10.0, 10.0, window()).is_err());
        assert!(UtilizationSample::new("core", f64::NAN, 10.0, 10.0, 10.0, window()).is_err());
    }

    #[test]
    fn test_sample_rejects_p95_below_avg() {
        let err = UtilizationSample::new("core", 40.0, 30.0, 10.0, 20.0, window()).unwrap_err();
        assert!(matches!(err, OptimizerError::InvalidSample(_)));
    }

    #[test]
    fn test_sample_avg_and_peak_take_max_dimension() {
        let s = UtilizationSample::new("core", 18.0, 32.0, 24.0, 39.0, window()).unwrap();
        assert_eq!(s.avg(), 24.0);
        assert_eq!(s.peak(), 39.0);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(NodeGroupRole::parse("core"), Some(NodeGroupRole::Core));
        assert_eq!(NodeGroupRole::parse("MASTER"), Some(NodeGroupRole::Master));
        assert_eq!(NodeGroupRole::parse("edge"), None);
        assert!(!NodeGroupRole::Master.is_worker());
    }

    #[test]
    fn test_cluster_runtime_hours() {
        let created = Utc::now() - Duration::minutes(200);
        let summary = ClusterSummary {
            id: "j-1".into(),
            name: "nightly-etl".into(),
            state: "TERMINATED".into(),
            created_at: created,
            ended_at: Some(created + Duration::minutes(93)),
        };
        assert_eq!(summary.runtime_hours(), Some(1.6));
    }
}
