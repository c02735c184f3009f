//! Recommendation engine
//!
//! Pure functions from utilization statistics and a current spec to:
//! - a sizing classification and workload profile
//! - headroom-adjusted resource requirements
//! - a cheaper same-family or cross-family spec, when one exists

mod engine;
mod sizing;

pub use engine::RecommendationEngine;
pub use sizing::{
    analyze_dimensions, classify_sample, classify_sizing, detect_profile, required_resources,
    ASYMMETRY_RATIO, HEADROOM_FACTOR, PROFILE_RATIO,
};
