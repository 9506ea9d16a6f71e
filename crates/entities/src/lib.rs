//! Entity and capability registry.
//!
//! Actions declare entity requirements (a type, a capability set, and
//! property constraints); the registry matches requirements against
//! registered entity specifications and tracks allocations so the planner
//! can gate actions on resource availability.

use common::{Error, Result, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// A registered entity specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Type name, e.g. `"chef"` or `"oven"`
    pub entity_type: String,
    /// Trait tags the entity provides
    pub capabilities: BTreeSet<String>,
    /// Free-form properties; `skill_level` and `base_cost` feed the
    /// allocation cost formula
    pub properties: BTreeMap<String, Value>,
}

impl EntitySpec {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            capabilities: BTreeSet::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// A requirement pattern matched against entity specifications.
///
/// Matching is conjunctive: the entity's type must equal the requirement's
/// type, its capabilities must cover the required set, and its properties
/// must match every specified key. `constraints` carries additional
/// non-matching metadata (e.g. temporal windows) interpreted downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRequirement {
    pub entity_type: String,
    pub capabilities: BTreeSet<String>,
    pub properties: BTreeMap<String, Value>,
    pub constraints: BTreeMap<String, Value>,
}

impl EntityRequirement {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// A successful requirement match with its allocation cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub entity_type: String,
    pub capabilities: BTreeSet<String>,
    /// `base_cost * skill_multiplier - capability_overlap_bonus`
    pub cost: f64,
}

/// An active allocation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub entity_type: String,
    pub action_id: String,
    pub allocated_at: Timestamp,
    pub capabilities_used: BTreeSet<String>,
}

/// Type and capability index over entity specifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistry {
    entity_types: HashMap<String, EntitySpec>,
    /// capability -> types providing it
    capability_index: HashMap<String, BTreeSet<String>>,
    /// synthesized entity id -> allocation
    allocations: HashMap<String, Allocation>,
    next_allocation: u64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity specification, replacing any previous spec for
    /// the same type name.
    pub fn register_entity_type(&mut self, spec: EntitySpec) {
        for capability in &spec.capabilities {
            self.capability_index
                .entry(capability.clone())
                .or_default()
                .insert(spec.entity_type.clone());
        }
        debug!(entity_type = %spec.entity_type, "registered entity type");
        self.entity_types.insert(spec.entity_type.clone(), spec);
    }

    pub fn get_by_type(&self, entity_type: &str) -> Option<&EntitySpec> {
        self.entity_types.get(entity_type)
    }

    /// All entity types providing the given capability, sorted.
    pub fn get_by_capability(&self, capability: &str) -> Vec<&EntitySpec> {
        self.capability_index
            .get(capability)
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| self.entity_types.get(t))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Match each requirement against the registry.
    ///
    /// Candidates are pruned through the capability index first, then
    /// filtered by type and property equality. Fails with
    /// `EntityUnavailable` if any requirement yields no candidate.
    pub fn match_entities(
        &self,
        requirements: &[EntityRequirement],
    ) -> Result<Vec<EntityMatch>> {
        let mut matches = Vec::with_capacity(requirements.len());

        for requirement in requirements {
            let mut candidates: Vec<&EntitySpec> = match requirement.capabilities.iter().next() {
                // Prune through the index on the first required capability.
                Some(first) => self
                    .capability_index
                    .get(first)
                    .map(|types| {
                        types
                            .iter()
                            .filter_map(|t| self.entity_types.get(t))
                            .collect()
                    })
                    .unwrap_or_default(),
                None => self.entity_types.values().collect(),
            };

            candidates.retain(|spec| Self::satisfies(spec, requirement));
            candidates.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));

            let best = candidates
                .into_iter()
                .map(|spec| EntityMatch {
                    entity_type: spec.entity_type.clone(),
                    capabilities: spec.capabilities.clone(),
                    cost: Self::allocation_cost(spec, requirement),
                })
                .min_by(|a, b| a.cost.total_cmp(&b.cost));

            match best {
                Some(m) => matches.push(m),
                None => {
                    return Err(Error::EntityUnavailable(format!(
                        "no entity matches requirement for type '{}'",
                        requirement.entity_type
                    )))
                }
            }
        }

        Ok(matches)
    }

    fn satisfies(spec: &EntitySpec, requirement: &EntityRequirement) -> bool {
        spec.entity_type == requirement.entity_type
            && requirement.capabilities.is_subset(&spec.capabilities)
            && requirement
                .properties
                .iter()
                .all(|(key, value)| spec.properties.get(key) == Some(value))
    }

    /// `base_cost * skill_multiplier - 0.1 * extra_capabilities`.
    ///
    /// `skill_multiplier` reads the `skill_level` property when present:
    /// expert 0.8, intermediate 1.0, novice 1.2.
    fn allocation_cost(spec: &EntitySpec, requirement: &EntityRequirement) -> f64 {
        let base_cost = spec
            .properties
            .get("base_cost")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        let skill_multiplier = match spec
            .properties
            .get("skill_level")
            .and_then(Value::as_str)
        {
            Some("expert") => 0.8,
            Some("novice") => 1.2,
            _ => 1.0,
        };
        let extra_capabilities =
            spec.capabilities.difference(&requirement.capabilities).count();

        base_cost * skill_multiplier - 0.1 * extra_capabilities as f64
    }

    /// Allocate the matched entities to an action, returning the
    /// synthesized entity ids.
    pub fn allocate(&mut self, matches: &[EntityMatch], action_id: &str) -> Vec<String> {
        let mut ids = Vec::with_capacity(matches.len());
        for m in matches {
            self.next_allocation += 1;
            let entity_id = format!("{}-{}", m.entity_type, self.next_allocation);
            self.allocations.insert(
                entity_id.clone(),
                Allocation {
                    entity_type: m.entity_type.clone(),
                    action_id: action_id.to_string(),
                    allocated_at: common::now(),
                    capabilities_used: m.capabilities.clone(),
                },
            );
            ids.push(entity_id);
        }
        debug!(action_id, count = ids.len(), "allocated entities");
        ids
    }

    /// Release allocations by entity id; unknown ids are ignored.
    pub fn release(&mut self, entity_ids: &[String]) {
        for id in entity_ids {
            self.allocations.remove(id);
        }
    }

    pub fn get_allocation(&self, entity_id: &str) -> Option<&Allocation> {
        self.allocations.get(entity_id)
    }

    /// Registered entity types with no active allocation, sorted by name.
    pub fn available_entities(&self) -> Vec<&EntitySpec> {
        let allocated: BTreeSet<&str> = self
            .allocations
            .values()
            .map(|a| a.entity_type.as_str())
            .collect();
        let mut available: Vec<&EntitySpec> = self
            .entity_types
            .values()
            .filter(|spec| !allocated.contains(spec.entity_type.as_str()))
            .collect();
        available.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));
        available
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_types.is_empty()
    }

    /// Consistency check: every type referenced in the capability index
    /// must exist in the entity-type table.
    pub fn validate_registry(&self) -> Result<()> {
        for (capability, types) in &self.capability_index {
            for entity_type in types {
                if !self.entity_types.contains_key(entity_type) {
                    return Err(Error::Validation(format!(
                        "capability index references unknown type '{}' for capability '{}'",
                        entity_type, capability
                    )));
                }
            }
        }
        Ok(())
    }
}
