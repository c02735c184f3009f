//! Instance pricing
//!
//! - Static on-demand catalog with family and architecture metadata
//! - Cost model comparing current and recommended fleets

mod catalog;
mod cost;

pub use catalog::{architecture_of, base_family, PricingCatalog, GRAVITON_FAMILIES, SIZE_ORDER};
pub use cost::{worker_fleets, CostConfig, CostModel};
