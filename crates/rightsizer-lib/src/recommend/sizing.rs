//! Sizing classification and workload profiling

use crate::models::{
    Dimension, DimensionAnalysis, InstanceSpec, RequiredResources, SizingClassification,
    UtilizationSample, WorkloadProfile,
};

/// Multiplicative safety margin on peak-derived requirements
pub const HEADROOM_FACTOR: f64 = 1.2;

/// Ratio between two utilization figures that marks one as dominant
pub const PROFILE_RATIO: f64 = 1.5;

/// Peak ratio at which CPU and memory are considered asymmetric
pub const ASYMMETRY_RATIO: f64 = 2.0;

/// (avg upper bound, peak upper bound), most restrictive first
const BANDS: [(SizingClassification, f64, f64); 3] = [
    (SizingClassification::HeavilyOversized, 25.0, 35.0),
    (SizingClassification::ModeratelyOversized, 50.0, 60.0),
    (SizingClassification::RightSized, 70.0, 80.0),
];

/// Classify an (avg, peak) pair. Both bounds of a band must hold; anything
/// past the last band is undersized.
pub fn classify_sizing(avg: f64, peak: f64) -> SizingClassification {
    BANDS
        .iter()
        .find(|(_, avg_max, peak_max)| avg < *avg_max && peak < *peak_max)
        .map(|(class, _, _)| *class)
        .unwrap_or(SizingClassification::Undersized)
}

/// Classify a node group by the higher of its CPU and memory figures
pub fn classify_sample(sample: &UtilizationSample) -> SizingClassification {
    classify_sizing(sample.avg(), sample.peak())
}

pub fn detect_profile(cpu: f64, mem: f64) -> WorkloadProfile {
    if cpu > PROFILE_RATIO * mem {
        WorkloadProfile::CpuHeavy
    } else if mem > PROFILE_RATIO * cpu {
        WorkloadProfile::MemoryHeavy
    } else {
        WorkloadProfile::Balanced
    }
}

pub fn required_resources(current: &InstanceSpec, peak_cpu: f64, peak_mem: f64) -> RequiredResources {
    RequiredResources {
        vcpu: current.vcpu as f64 * (peak_cpu / 100.0) * HEADROOM_FACTOR,
        memory_gib: current.memory_gib * (peak_mem / 100.0) * HEADROOM_FACTOR,
    }
}

fn band_index(class: SizingClassification) -> i32 {
    match class {
        SizingClassification::HeavilyOversized => 0,
        SizingClassification::ModeratelyOversized => 1,
        SizingClassification::RightSized => 2,
        SizingClassification::Undersized => 3,
    }
}

/// Classify CPU and memory separately and flag when they diverge
pub fn analyze_dimensions(sample: &UtilizationSample) -> DimensionAnalysis {
    let cpu = classify_sizing(sample.cpu_avg, sample.cpu_p95);
    let memory = classify_sizing(sample.mem_avg, sample.mem_p95);

    let gap = (band_index(cpu) - band_index(memory)).abs();
    let peak_cpu = sample.cpu_p95.max(0.1);
    let peak_mem = sample.mem_p95.max(0.1);
    let ratio = (peak_cpu / peak_mem).max(peak_mem / peak_cpu);

    let constraining = if band_index(cpu) != band_index(memory) {
        if band_index(cpu) > band_index(memory) {
            Dimension::Cpu
        } else {
            Dimension::Memory
        }
    } else if sample.cpu_p95 >= sample.mem_p95 {
        Dimension::Cpu
    } else {
        Dimension::Memory
    };

    DimensionAnalysis {
        cpu,
        memory,
        asymmetric: gap >= 2 || ratio >= ASYMMETRY_RATIO,
        constraining,
    }
}
