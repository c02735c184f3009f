//! Per-run and monthly cost comparison

use crate::models::{CostEstimate, FleetLine, Recommendation};

/// Default number of runs a transient cluster makes per month
const DEFAULT_RUNS_PER_MONTH: u32 = 30;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Runs per month used to extrapolate savings
    pub runs_per_month: u32,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            runs_per_month: DEFAULT_RUNS_PER_MONTH,
        }
    }
}

/// Pure arithmetic over fleet compositions
#[derive(Debug, Clone, Default)]
pub struct CostModel {
    config: CostConfig,
}

impl CostModel {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    pub fn runs_per_month(&self) -> u32 {
        self.config.runs_per_month
    }

    /// Σ price × count × hours
    pub fn per_run(&self, fleet: &[FleetLine], runtime_hours: f64) -> f64 {
        fleet
            .iter()
            .map(|line| line.spec.hourly_price * line.count as f64 * runtime_hours)
            .sum()
    }

    pub fn estimate(
        &self,
        current: &[FleetLine],
        recommended: &[FleetLine],
        runtime_hours: f64,
    ) -> CostEstimate {
        let per_run_current = self.per_run(current, runtime_hours);
        let per_run_recommended = self.per_run(recommended, runtime_hours);
        CostEstimate {
            runtime_hours,
            runs_per_month: self.config.runs_per_month,
            per_run_current,
            per_run_recommended,
            monthly_savings: (per_run_current - per_run_recommended)
                * self.config.runs_per_month as f64,
            test_run_cost: per_run_recommended,
        }
    }

    /// Estimate directly from per-node-group recommendations
    pub fn estimate_recommendations(
        &self,
        recommendations: &[Recommendation],
        runtime_hours: f64,
    ) -> CostEstimate {
        let (current, recommended) = worker_fleets(recommendations);
        self.estimate(&current, &recommended, runtime_hours)
    }
}

/// Current and recommended worker fleets; groups without a recommendation keep their spec
pub fn worker_fleets(recommendations: &[Recommendation]) -> (Vec<FleetLine>, Vec<FleetLine>) {
    let current = recommendations
        .iter()
        .map(|r| FleetLine {
            role: r.role,
            spec: r.current_spec.clone(),
            count: r.instance_count,
        })
        .collect();
    let recommended = recommendations
        .iter()
        .map(|r| FleetLine {
            role: r.role,
            spec: r.effective_spec().clone(),
            count: r.instance_count,
        })
        .collect();
    (current, recommended)
}
