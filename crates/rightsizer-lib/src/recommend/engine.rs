//! Instance recommendation for one node group

use super::sizing::{analyze_dimensions, classify_sample, detect_profile, required_resources};
use crate::error::Result;
use crate::models::{
    InstanceSpec, NodeGroup, Recommendation, RecommendationKind, RequiredResources,
    SizingClassification, UtilizationSample, WorkloadProfile,
};
use crate::pricing::{base_family, PricingCatalog};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

const MAX_ALTERNATIVES: usize = 3;
const MAX_NEAR_MISSES: usize = 3;

/// Maps utilization and the current spec to a cheaper qualifying spec
#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    catalog: Arc<PricingCatalog>,
}

impl RecommendationEngine {
    pub fn new(catalog: Arc<PricingCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PricingCatalog {
        &self.catalog
    }

    /// Resolve the group's current spec and evaluate it.
    ///
    /// Fails with `CatalogLookup` when the current instance type has no
    /// catalog entry and no nearest match.
    pub fn recommend(&self, group: &NodeGroup, sample: &UtilizationSample) -> Result<Recommendation> {
        sample.validate()?;
        let current = self.catalog.resolve(&group.instance_type)?;
        Ok(self.evaluate(group, current, sample))
    }

    pub fn evaluate(
        &self,
        group: &NodeGroup,
        current: InstanceSpec,
        sample: &UtilizationSample,
    ) -> Recommendation {
        let classification = classify_sample(sample);
        let profile = detect_profile(sample.cpu_p95, sample.mem_p95);
        let required = required_resources(&current, sample.cpu_p95, sample.mem_p95);
        let dimensions = analyze_dimensions(sample);

        let overprovisioning = if required.vcpu > 0.0 && required.memory_gib > 0.0 {
            Some((
                current.vcpu as f64 / required.vcpu,
                current.memory_gib / required.memory_gib,
            ))
        } else {
            None
        };

        let mut rec = Recommendation {
            node_group_id: group.id.clone(),
            role: group.role,
            instance_count: group.instance_count,
            current_spec: current,
            recommended_spec: None,
            classification,
            profile,
            kind: RecommendationKind::None,
            architecture_changed: false,
            savings_percent: 0.0,
            required,
            dimensions,
            overprovisioning,
            alternatives: Vec::new(),
            explanation: None,
        };

        if !classification.is_oversized() {
            rec.explanation = Some(match classification {
                SizingClassification::Undersized => {
                    "Node group is undersized; a smaller spec would risk the workload".to_string()
                }
                _ => "Node group is right-sized; no change needed".to_string(),
            });
            return rec;
        }

        let selection = self
            .same_family(&rec.current_spec, &required)
            .map(|spec| (spec, RecommendationKind::SameFamily))
            .or_else(|| {
                self.cross_family(&rec.current_spec, &required, profile)
                    .first()
                    .map(|spec| (*spec, RecommendationKind::CrossFamily))
            });

        match selection {
            Some((spec, kind)) => {
                let current_price = rec.current_spec.hourly_price;
                rec.architecture_changed = spec.architecture != rec.current_spec.architecture;
                rec.savings_percent =
                    round1((current_price - spec.hourly_price) / current_price * 100.0);
                rec.alternatives = self
                    .cross_family(&rec.current_spec, &required, profile)
                    .into_iter()
                    .filter(|s| s.instance_type != spec.instance_type)
                    .take(MAX_ALTERNATIVES)
                    .cloned()
                    .collect();
                rec.kind = kind;
                rec.recommended_spec = Some(spec.clone());

                debug!(
                    node_group = %rec.node_group_id,
                    current = %rec.current_spec.instance_type,
                    recommended = %spec.instance_type,
                    kind = %kind,
                    "Selected replacement spec"
                );
            }
            None => {
                rec.explanation = Some(self.explain_no_candidate(&rec.current_spec, &required));
            }
        }

        rec
    }

    /// Smallest spec in the current family that fits and is cheaper
    fn same_family(&self, current: &InstanceSpec, required: &RequiredResources) -> Option<&InstanceSpec> {
        self.catalog
            .family(base_family(&current.family))
            .into_iter()
            .find(|s| qualifies(s, current, required))
    }

    /// All qualifying specs, cheapest first, then fewest vCPU
    fn cross_family(
        &self,
        current: &InstanceSpec,
        required: &RequiredResources,
        profile: WorkloadProfile,
    ) -> Vec<&InstanceSpec> {
        let mut candidates: Vec<&InstanceSpec> = self
            .catalog
            .specs()
            .iter()
            .filter(|s| qualifies(s, current, required))
            .collect();
        candidates.sort_by(|a, b| {
            a.hourly_price
                .partial_cmp(&b.hourly_price)
                .unwrap_or(Ordering::Equal)
                .then(a.vcpu.cmp(&b.vcpu))
                .then(matches_profile(b, profile).cmp(&matches_profile(a, profile)))
                .then(a.instance_type.cmp(&b.instance_type))
        });
        candidates
    }

    fn explain_no_candidate(&self, current: &InstanceSpec, required: &RequiredResources) -> String {
        let mut near: Vec<&InstanceSpec> = self
            .catalog
            .specs()
            .iter()
            .filter(|s| s.hourly_price < current.hourly_price)
            .collect();
        near.sort_by(|a, b| {
            b.hourly_price
                .partial_cmp(&a.hourly_price)
                .unwrap_or(Ordering::Equal)
                .then(a.instance_type.cmp(&b.instance_type))
        });

        let misses: Vec<String> = near
            .into_iter()
            .take(MAX_NEAR_MISSES)
            .map(|s| {
                let mut short = Vec::new();
                if (s.vcpu as f64) < required.vcpu {
                    short.push(format!("{:.1} vCPU short", required.vcpu - s.vcpu as f64));
                }
                if s.memory_gib < required.memory_gib {
                    short.push(format!("{:.1} GiB short", required.memory_gib - s.memory_gib));
                }
                format!("{} (${:.3}/h, {})", s.instance_type, s.hourly_price, short.join(", "))
            })
            .collect();

        let mut explanation = format!(
            "No cheaper spec than {} provides {:.1} vCPU and {:.1} GiB",
            current.instance_type, required.vcpu, required.memory_gib
        );
        if !misses.is_empty() {
            explanation.push_str("; closest: ");
            explanation.push_str(&misses.join("; "));
        }
        explanation
    }
}

fn qualifies(candidate: &InstanceSpec, current: &InstanceSpec, required: &RequiredResources) -> bool {
    candidate.vcpu as f64 >= required.vcpu
        && candidate.memory_gib >= required.memory_gib
        && candidate.hourly_price < current.hourly_price
}

/// c families suit CPU-heavy work, r memory-heavy, m balanced
fn matches_profile(spec: &InstanceSpec, profile: WorkloadProfile) -> bool {
    let class = spec.family.chars().next().unwrap_or_default();
    matches!(
        (profile, class),
        (WorkloadProfile::CpuHeavy, 'c')
            | (WorkloadProfile::MemoryHeavy, 'r')
            | (WorkloadProfile::Balanced, 'm')
    )
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
