//! Cluster configuration record editing
//!
//! The record is a JSON object whose `Instances` field holds the fleet list,
//! either inline or as a JSON-encoded string. Only the primary instance type
//! of CORE and TASK fleets and the top-level `GravitonAmi` flag are edited;
//! key order and every other field survive untouched.

use crate::error::{OptimizerError, Result};
use crate::models::{Architecture, NodeGroupRole, Recommendation};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const INSTANCES_FIELD: &str = "Instances";
pub const FLEETS_FIELD: &str = "InstanceFleets";
pub const ARCHITECTURE_FLAG: &str = "GravitonAmi";

#[derive(Debug, Clone)]
pub struct ConfigRecord {
    root: Map<String, Value>,
    instances: Value,
    /// `Instances` was stored as a JSON string
    instances_encoded: bool,
}

impl ConfigRecord {
    pub fn parse(raw: &str) -> Result<Self> {
        let root = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(parse_error("record is not a JSON object")),
            Err(e) => return Err(parse_error(&format!("invalid JSON: {}", e))),
        };

        let (instances, instances_encoded) = match root.get(INSTANCES_FIELD) {
            Some(Value::String(encoded)) => {
                let value = serde_json::from_str::<Value>(encoded).map_err(|e| {
                    parse_error(&format!("{} is not valid JSON: {}", INSTANCES_FIELD, e))
                })?;
                (value, true)
            }
            Some(value @ Value::Object(_)) => (value.clone(), false),
            Some(_) => {
                return Err(parse_error(&format!(
                    "{} must be an object or a JSON string",
                    INSTANCES_FIELD
                )))
            }
            None => return Err(parse_error(&format!("missing {}", INSTANCES_FIELD))),
        };

        if !instances.get(FLEETS_FIELD).map_or(false, Value::is_array) {
            return Err(parse_error(&format!("{} has no {} list", INSTANCES_FIELD, FLEETS_FIELD)));
        }

        Ok(Self {
            root,
            instances,
            instances_encoded,
        })
    }

    fn fleets(&self) -> &[Value] {
        self.instances
            .get(FLEETS_FIELD)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn fleet_role(fleet: &Value) -> Option<NodeGroupRole> {
        fleet
            .get("InstanceFleetType")
            .and_then(Value::as_str)
            .and_then(NodeGroupRole::parse)
    }

    /// Primary instance type per fleet role
    pub fn primary_types(&self) -> BTreeMap<NodeGroupRole, String> {
        self.fleets()
            .iter()
            .filter_map(|fleet| {
                let role = Self::fleet_role(fleet)?;
                let itype = fleet
                    .get("InstanceTypeConfigs")?
                    .get(0)?
                    .get("InstanceType")?
                    .as_str()?;
                Some((role, itype.to_string()))
            })
            .collect()
    }

    pub fn graviton(&self) -> bool {
        self.root
            .get(ARCHITECTURE_FLAG)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Replace the primary instance type of the `role` fleet.
    ///
    /// Returns the change line, or None when the type already matches.
    pub fn set_instance_type(&mut self, role: NodeGroupRole, instance_type: &str) -> Result<Option<String>> {
        if !role.is_worker() {
            return Err(parse_error(&format!("{} fleet is never modified", role)));
        }

        let fleets = self
            .instances
            .get_mut(FLEETS_FIELD)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| parse_error(&format!("missing {}", FLEETS_FIELD)))?;
        let fleet = fleets
            .iter_mut()
            .find(|f| Self::fleet_role(f) == Some(role))
            .ok_or_else(|| parse_error(&format!("record has no {} fleet", role)))?;
        let slot = fleet
            .get_mut("InstanceTypeConfigs")
            .and_then(|c| c.get_mut(0))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| parse_error(&format!("{} fleet has no instance type configs", role)))?;

        let old = slot
            .get("InstanceType")
            .and_then(Value::as_str)
            .ok_or_else(|| parse_error(&format!("{} fleet has no InstanceType", role)))?
            .to_string();
        if old == instance_type {
            return Ok(None);
        }
        slot.insert("InstanceType".to_string(), Value::String(instance_type.to_string()));
        Ok(Some(format!("{}: {} -> {}", role, old, instance_type)))
    }

    pub fn set_graviton(&mut self, enabled: bool) -> Option<String> {
        let old = self.graviton();
        if old == enabled {
            return None;
        }
        self.root
            .insert(ARCHITECTURE_FLAG.to_string(), Value::Bool(enabled));
        Some(format!("{}: {} -> {}", ARCHITECTURE_FLAG, old, enabled))
    }

    /// Serialize, keeping `Instances` in the form it was read in
    pub fn to_raw(&self) -> Result<String> {
        let mut root = self.root.clone();
        let instances = if self.instances_encoded {
            let encoded = serde_json::to_string(&self.instances)
                .map_err(|e| parse_error(&format!("cannot encode {}: {}", INSTANCES_FIELD, e)))?;
            Value::String(encoded)
        } else {
            self.instances.clone()
        };
        root.insert(INSTANCES_FIELD.to_string(), instances);
        serde_json::to_string(&Value::Object(root))
            .map_err(|e| parse_error(&format!("cannot encode record: {}", e)))
    }
}

fn parse_error(reason: &str) -> OptimizerError {
    OptimizerError::ConfigParse(reason.to_string())
}

/// Apply actionable recommendations to a raw record.
///
/// Returns the new raw value and the list of changes. Fails with
/// `ConfigParse` before anything is written.
pub fn apply_recommendations(raw: &str, recommendations: &[Recommendation]) -> Result<(String, Vec<String>)> {
    let mut record = ConfigRecord::parse(raw)?;
    let mut changes = Vec::new();
    let mut target_arch = None;

    for rec in recommendations.iter().filter(|r| r.is_actionable() && r.role.is_worker()) {
        let spec = rec.effective_spec();
        if let Some(change) = record.set_instance_type(rec.role, &spec.instance_type)? {
            changes.push(change);
        }
        if rec.architecture_changed {
            target_arch = Some(spec.architecture);
        }
    }

    if let Some(arch) = target_arch {
        if let Some(change) = record.set_graviton(arch == Architecture::Graviton) {
            changes.push(change);
        }
    }

    Ok((record.to_raw()?, changes))
}
