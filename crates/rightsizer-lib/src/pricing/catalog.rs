//! Static on-demand pricing catalog

use crate::error::{OptimizerError, Result};
use crate::models::{Architecture, InstanceSpec};
use tracing::warn;

/// Families running on Graviton (arm64) processors
pub const GRAVITON_FAMILIES: &[&str] = &[
    "a1", "c6g", "c6gd", "c7g", "c7gd", "m6g", "m6gd", "m7g", "m7gd", "r6g", "r6gd", "r7g", "r7gd",
];

/// Known sizes, smallest first
pub const SIZE_ORDER: &[&str] = &[
    "xlarge", "2xlarge", "4xlarge", "8xlarge", "9xlarge", "12xlarge", "16xlarge",
];

/// (instance type, vCPU, memory GiB, USD per hour)
const BUILTIN_PRICES: &[(&str, u32, f64, f64)] = &[
    ("m5.xlarge", 4, 16.0, 0.192),
    ("m5.2xlarge", 8, 32.0, 0.384),
    ("m5.4xlarge", 16, 64.0, 0.768),
    ("m5.8xlarge", 32, 128.0, 1.536),
    ("m5.12xlarge", 48, 192.0, 2.304),
    ("m5.16xlarge", 64, 256.0, 3.072),
    ("m6i.xlarge", 4, 16.0, 0.192),
    ("m6i.2xlarge", 8, 32.0, 0.384),
    ("m6i.4xlarge", 16, 64.0, 0.768),
    ("m6i.8xlarge", 32, 128.0, 1.536),
    ("m6i.12xlarge", 48, 192.0, 2.304),
    ("m6i.16xlarge", 64, 256.0, 3.072),
    ("m6g.xlarge", 4, 16.0, 0.154),
    ("m6g.2xlarge", 8, 32.0, 0.308),
    ("m6g.4xlarge", 16, 64.0, 0.616),
    ("m6g.8xlarge", 32, 128.0, 1.232),
    ("m6g.12xlarge", 48, 192.0, 1.848),
    ("m6g.16xlarge", 64, 256.0, 2.464),
    ("m7i.xlarge", 4, 16.0, 0.202),
    ("m7i.2xlarge", 8, 32.0, 0.403),
    ("m7i.4xlarge", 16, 64.0, 0.806),
    ("m7i.8xlarge", 32, 128.0, 1.613),
    ("m7i.12xlarge", 48, 192.0, 2.419),
    ("m7i.16xlarge", 64, 256.0, 3.226),
    ("m7g.xlarge", 4, 16.0, 0.163),
    ("m7g.2xlarge", 8, 32.0, 0.326),
    ("m7g.4xlarge", 16, 64.0, 0.653),
    ("m7g.8xlarge", 32, 128.0, 1.306),
    ("m7g.12xlarge", 48, 192.0, 1.958),
    ("m7g.16xlarge", 64, 256.0, 2.611),
    ("r5.xlarge", 4, 32.0, 0.252),
    ("r5.2xlarge", 8, 64.0, 0.504),
    ("r5.4xlarge", 16, 128.0, 1.008),
    ("r5.8xlarge", 32, 256.0, 2.016),
    ("r5.12xlarge", 48, 384.0, 3.024),
    ("r5.16xlarge", 64, 512.0, 4.032),
    ("r6i.xlarge", 4, 32.0, 0.252),
    ("r6i.2xlarge", 8, 64.0, 0.504),
    ("r6i.4xlarge", 16, 128.0, 1.008),
    ("r6i.8xlarge", 32, 256.0, 2.016),
    ("r6i.12xlarge", 48, 384.0, 3.024),
    ("r6i.16xlarge", 64, 512.0, 4.032),
    ("r6g.xlarge", 4, 32.0, 0.201),
    ("r6g.2xlarge", 8, 64.0, 0.403),
    ("r6g.4xlarge", 16, 128.0, 0.806),
    ("r6g.8xlarge", 32, 256.0, 1.613),
    ("r6g.12xlarge", 48, 384.0, 2.419),
    ("r6g.16xlarge", 64, 512.0, 3.226),
    ("r7i.xlarge", 4, 32.0, 0.265),
    ("r7i.2xlarge", 8, 64.0, 0.530),
    ("r7i.4xlarge", 16, 128.0, 1.059),
    ("r7i.8xlarge", 32, 256.0, 2.118),
    ("r7i.12xlarge", 48, 384.0, 3.178),
    ("r7i.16xlarge", 64, 512.0, 4.237),
    ("r7g.xlarge", 4, 32.0, 0.214),
    ("r7g.2xlarge", 8, 64.0, 0.428),
    ("r7g.4xlarge", 16, 128.0, 0.857),
    ("r7g.8xlarge", 32, 256.0, 1.714),
    ("r7g.12xlarge", 48, 384.0, 2.570),
    ("r7g.16xlarge", 64, 512.0, 3.427),
    ("c5.xlarge", 4, 8.0, 0.170),
    ("c5.2xlarge", 8, 16.0, 0.340),
    ("c5.4xlarge", 16, 32.0, 0.680),
    ("c5.9xlarge", 36, 72.0, 1.530),
    ("c5.12xlarge", 48, 96.0, 2.040),
    ("c6i.xlarge", 4, 8.0, 0.170),
    ("c6i.2xlarge", 8, 16.0, 0.340),
    ("c6i.4xlarge", 16, 32.0, 0.680),
    ("c6i.8xlarge", 32, 64.0, 1.360),
    ("c6i.12xlarge", 48, 96.0, 2.040),
    ("c6i.16xlarge", 64, 128.0, 2.720),
    ("c6g.xlarge", 4, 8.0, 0.136),
    ("c6g.2xlarge", 8, 16.0, 0.272),
    ("c6g.4xlarge", 16, 32.0, 0.544),
    ("c6g.8xlarge", 32, 64.0, 1.088),
    ("c6g.12xlarge", 48, 96.0, 1.632),
    ("c6g.16xlarge", 64, 128.0, 2.176),
    ("c7i.xlarge", 4, 8.0, 0.179),
    ("c7i.2xlarge", 8, 16.0, 0.357),
    ("c7i.4xlarge", 16, 32.0, 0.714),
    ("c7i.8xlarge", 32, 64.0, 1.428),
    ("c7i.12xlarge", 48, 96.0, 2.142),
    ("c7i.16xlarge", 64, 128.0, 2.856),
    ("c7g.xlarge", 4, 8.0, 0.145),
    ("c7g.2xlarge", 8, 16.0, 0.289),
    ("c7g.4xlarge", 16, 32.0, 0.578),
    ("c7g.8xlarge", 32, 64.0, 1.156),
    ("c7g.12xlarge", 48, 96.0, 1.734),
    ("c7g.16xlarge", 64, 128.0, 2.312),
];

/// Architecture of an instance type, judged by its family
pub fn architecture_of(instance_type: &str) -> Architecture {
    let family = instance_type.split('.').next().unwrap_or_default();
    if GRAVITON_FAMILIES.contains(&family) {
        Architecture::Graviton
    } else {
        Architecture::X86
    }
}

/// Strip storage and network variant suffixes (`m6gd` -> `m6g`, `r5dn` -> `r5`)
pub fn base_family(family: &str) -> &str {
    for suffix in ["dn", "d", "n"] {
        if let Some(stripped) = family.strip_suffix(suffix) {
            if stripped.chars().any(|c| c.is_ascii_digit()) {
                return stripped;
            }
        }
    }
    family
}

fn split_type(instance_type: &str) -> Option<(&str, &str)> {
    let (family, size) = instance_type.split_once('.')?;
    if family.is_empty() || size.is_empty() {
        return None;
    }
    Some((family, size))
}

/// Catalog of purchasable specs
#[derive(Debug, Clone)]
pub struct PricingCatalog {
    specs: Vec<InstanceSpec>,
}

impl Default for PricingCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PricingCatalog {
    /// Catalog backed by the built-in on-demand price table
    pub fn builtin() -> Self {
        let specs = BUILTIN_PRICES
            .iter()
            .filter_map(|(instance_type, vcpu, memory_gib, price)| {
                let (family, size) = split_type(instance_type)?;
                Some(InstanceSpec {
                    instance_type: instance_type.to_string(),
                    family: family.to_string(),
                    size: size.to_string(),
                    vcpu: *vcpu,
                    memory_gib: *memory_gib,
                    architecture: architecture_of(instance_type),
                    hourly_price: *price,
                })
            })
            .collect();
        Self { specs }
    }

    /// Catalog from explicit specs; non-positive prices are dropped
    pub fn from_specs(specs: impl IntoIterator<Item = InstanceSpec>) -> Self {
        let specs = specs
            .into_iter()
            .filter(|s| {
                let valid = s.hourly_price > 0.0 && s.hourly_price.is_finite();
                if !valid {
                    warn!(instance_type = %s.instance_type, "Dropping spec with non-positive price");
                }
                valid
            })
            .collect();
        Self { specs }
    }

    pub fn specs(&self) -> &[InstanceSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, instance_type: &str) -> Option<&InstanceSpec> {
        self.specs.iter().find(|s| s.instance_type == instance_type)
    }

    /// Specs of one family ordered from smallest to largest
    pub fn family(&self, family: &str) -> Vec<&InstanceSpec> {
        let mut members: Vec<&InstanceSpec> =
            self.specs.iter().filter(|s| s.family == family).collect();
        members.sort_by(|a, b| {
            size_rank(&a.size)
                .cmp(&size_rank(&b.size))
                .then(a.vcpu.cmp(&b.vcpu))
        });
        members
    }

    /// Distinct family names in catalog order
    pub fn families(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for spec in &self.specs {
            if !seen.contains(&spec.family.as_str()) {
                seen.push(&spec.family);
            }
        }
        seen
    }

    /// Resolve an instance type, falling back to the same size in the base family.
    ///
    /// A fallback keeps the requested type and family names with the
    /// matched spec's capacity and price.
    pub fn resolve(&self, instance_type: &str) -> Result<InstanceSpec> {
        if let Some(spec) = self.get(instance_type) {
            return Ok(spec.clone());
        }

        let (family, size) = split_type(instance_type)
            .ok_or_else(|| OptimizerError::CatalogLookup(instance_type.to_string()))?;
        let base = base_family(family);
        if base == family {
            return Err(OptimizerError::CatalogLookup(instance_type.to_string()));
        }

        let nearest = self
            .get(&format!("{}.{}", base, size))
            .ok_or_else(|| OptimizerError::CatalogLookup(instance_type.to_string()))?;

        warn!(
            instance_type,
            nearest = %nearest.instance_type,
            "Instance type not in catalog, using nearest match"
        );

        Ok(InstanceSpec {
            instance_type: instance_type.to_string(),
            family: family.to_string(),
            architecture: architecture_of(instance_type),
            ..nearest.clone()
        })
    }
}

fn size_rank(size: &str) -> usize {
    SIZE_ORDER
        .iter()
        .position(|s| *s == size)
        .unwrap_or(SIZE_ORDER.len())
}
