//! Temporal composition of a refined plan.
//!
//! After refinement, the primitive actions' durations, anchors and
//! temporal constraints are composed into an STN whose consistency gates
//! plan acceptance. Each primitive contributes start and end points tied
//! by its resolved duration; extraction order contributes sequential
//! precedence; absolute anchors, deadlines and availability windows are
//! expressed as offsets from the earliest absolute instant so bounds stay
//! far below the insertion cap. Resource-dependent durations resolve
//! against the entities matched for the action's requirements.

use crate::tree::{NodeId, NodeTask, SolutionTree};
use common::{Result, Timestamp};
use domain::{Domain, TodoItem};
use serde_json::Value;
use state::State;
use std::collections::BTreeMap;
use temporal::stn::{end_point, start_point};
use temporal::{
    Bound, Duration, PrecedenceConstraint, Stn, StnOptions, TemporalConstraint, TemporalPattern,
    TimedAction,
};
use tracing::debug;

/// Reference time point that absolute instants are measured from.
const ORIGIN_POINT: &str = "plan_origin";

/// Unique STN instance name for one primitive node.
pub fn instance_name(action: &str, id: NodeId) -> String {
    format!("{}#{}", action, id.0)
}

/// Whether an action has a non-zero duration or an absolute anchor.
pub fn is_durative(domain: &Domain, name: &str) -> bool {
    if let Some(specs) = domain.temporal_specs() {
        if let Some(duration) = specs.get_action_duration(name) {
            return !matches!(duration, Duration::Fixed { seconds } if *seconds == 0.0);
        }
    }
    if let Some(action) = domain.action(name) {
        if action.start.is_some() || action.end.is_some() {
            return true;
        }
        return !matches!(&action.duration, Duration::Fixed { seconds } if *seconds == 0.0);
    }
    if let Some(command) = domain.command(name) {
        return !matches!(&command.duration, Duration::Fixed { seconds } if *seconds == 0.0);
    }
    false
}

/// Resolve an action's duration in seconds against the planning state and
/// resource assignment. The temporal-specification table wins over the
/// action's own duration.
fn resolved_duration(
    domain: &Domain,
    name: &str,
    state: &State,
    resources: &BTreeMap<String, String>,
) -> f64 {
    if let Some(specs) = domain.temporal_specs() {
        if specs.get_action_duration(name).is_some() {
            return specs.calculate_duration(name, state, resources);
        }
    }
    if let Some(action) = domain.action(name) {
        return action.duration.calculate(state, resources);
    }
    if let Some(command) = domain.command(name) {
        return command.duration.calculate(state, resources);
    }
    0.0
}

/// Derive the resource assignment for an action from entity matching:
/// each matched entity contributes `entity_type -> skill_level`, which is
/// the quality key resource-dependent durations divide by.
fn action_resources(domain: &Domain, name: &str) -> BTreeMap<String, String> {
    let mut resources = BTreeMap::new();
    let Some(action) = domain.action(name) else {
        return resources;
    };
    if action.entity_requirements.is_empty() {
        return resources;
    }
    let Some(registry) = domain.entity_registry() else {
        return resources;
    };
    match registry.match_entities(&action.entity_requirements) {
        Ok(matches) => {
            for m in &matches {
                let quality = registry
                    .get_by_type(&m.entity_type)
                    .and_then(|spec| spec.properties.get("skill_level"))
                    .and_then(Value::as_str);
                if let Some(quality) = quality {
                    resources.insert(m.entity_type.clone(), quality.to_string());
                }
            }
        }
        Err(err) => {
            // The feasibility gate already ran at expansion time; a late
            // mismatch just means no quality information is available.
            debug!(action = name, %err, "entity matching failed while resolving durations");
        }
    }
    resources
}

/// Absolute instants referenced by a temporal constraint.
fn constraint_instants(constraint: &TemporalConstraint) -> Vec<Timestamp> {
    match constraint {
        TemporalConstraint::Deadline { at }
        | TemporalConstraint::EarliestStart { at }
        | TemporalConstraint::LatestEnd { at } => vec![*at],
        TemporalConstraint::ResourceAvailability { from, until, .. } => vec![*from, *until],
    }
}

/// Compose the plan's temporal network, or `None` when nothing in the
/// plan carries temporal information.
pub fn compose_plan_network(domain: &Domain, tree: &SolutionTree) -> Result<Option<Stn>> {
    let state = tree.node(tree.root_id())?.cached_state.clone();

    let mut timed = Vec::new();
    let mut anchors: Vec<(String, Option<Timestamp>, Option<Timestamp>)> = Vec::new();
    let mut windows: Vec<(String, TemporalConstraint)> = Vec::new();
    let mut has_temporal_info = false;

    for id in tree.get_primitive_actions(tree.root_id()) {
        let node = tree.node(id)?;
        let NodeTask::Todo(TodoItem::Task { name, .. }) = &node.task else {
            continue;
        };
        let instance = instance_name(name, id);
        let resources = action_resources(domain, name);
        let declared = resolved_duration(domain, name, &state, &resources);
        let (anchor_start, anchor_end) = domain
            .action(name)
            .map(|a| (a.start, a.end))
            .unwrap_or((None, None));

        // Derive the missing anchor members and validate over-constrained
        // combinations before anything reaches the network.
        let pattern = TemporalPattern::new(
            anchor_start,
            anchor_end,
            (declared > 0.0).then_some(declared),
        )
        .resolve()?;
        let duration = pattern.duration.unwrap_or(declared);

        if duration > 0.0 || pattern.start.is_some() || pattern.end.is_some() {
            has_temporal_info = true;
        }
        if let Some(specs) = domain.temporal_specs() {
            for constraint in specs.get_action_constraints(name) {
                has_temporal_info = true;
                windows.push((instance.clone(), constraint.clone()));
            }
        }
        timed.push(TimedAction::new(instance.clone(), duration));
        anchors.push((instance, pattern.start, pattern.end));
    }

    if !has_temporal_info {
        return Ok(None);
    }

    // Execution is sequential in extraction order.
    let precedence: Vec<PrecedenceConstraint> = timed
        .windows(2)
        .map(|pair| PrecedenceConstraint::Before {
            first: pair[0].name.clone(),
            second: pair[1].name.clone(),
        })
        .collect();

    let opts = StnOptions {
        max_timepoints: (timed.len() * 2 + 2).max(256),
        ..StnOptions::default()
    };
    let mut stn = Stn::from_timed_actions(&timed, &precedence, opts)?;

    let reference = anchors
        .iter()
        .flat_map(|(_, start, end)| [*start, *end])
        .flatten()
        .chain(windows.iter().flat_map(|(_, c)| constraint_instants(c)))
        .min();
    if let Some(reference) = reference {
        stn.add_time_point(ORIGIN_POINT)?;
        for (instance, start, end) in &anchors {
            if let Some(start) = start {
                let offset = offset_seconds(*start, reference);
                stn.add_constraint(ORIGIN_POINT, &start_point(instance), Bound::exact(offset))?;
            }
            if let Some(end) = end {
                let offset = offset_seconds(*end, reference);
                stn.add_constraint(ORIGIN_POINT, &end_point(instance), Bound::exact(offset))?;
            }
        }
        for (instance, constraint) in &windows {
            match constraint {
                TemporalConstraint::Deadline { at }
                | TemporalConstraint::LatestEnd { at } => {
                    stn.add_constraint(
                        ORIGIN_POINT,
                        &end_point(instance),
                        Bound::at_most(offset_seconds(*at, reference)),
                    )?;
                }
                TemporalConstraint::EarliestStart { at } => {
                    stn.add_constraint(
                        ORIGIN_POINT,
                        &start_point(instance),
                        Bound::at_least(offset_seconds(*at, reference)),
                    )?;
                }
                TemporalConstraint::ResourceAvailability { from, until, .. } => {
                    stn.add_constraint(
                        ORIGIN_POINT,
                        &start_point(instance),
                        Bound::at_least(offset_seconds(*from, reference)),
                    )?;
                    stn.add_constraint(
                        ORIGIN_POINT,
                        &end_point(instance),
                        Bound::at_most(offset_seconds(*until, reference)),
                    )?;
                }
            }
        }
    }

    debug!(
        points = stn.time_points().len(),
        "composed plan temporal network"
    );
    Ok(Some(stn))
}

fn offset_seconds(instant: Timestamp, reference: Timestamp) -> f64 {
    instant
        .signed_duration_since(reference)
        .num_milliseconds() as f64
        / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{HtnPlanner, PlanOptions};
    use chrono::{FixedOffset, TimeZone, Utc};
    use domain::{ActionSpec, EffectFn};
    use entities::{EntityRegistry, EntitySpec, EntityRequirement};
    use serde_json::json;
    use std::sync::Arc;
    use temporal::TemporalSpecifications;

    fn noop_effect() -> EffectFn {
        Arc::new(|state: &State, _: &[Value]| Ok(state.clone()))
    }

    /// Temporal pattern derivation: a start anchor plus PT2H yields an
    /// exact two-hour start-to-end constraint, end derived at noon.
    #[test]
    fn test_start_plus_duration_derives_end() {
        let start = FixedOffset::west_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 22, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        let mut domain = Domain::new("brewery");
        domain.register_action(
            ActionSpec::new("brew", noop_effect())
                .with_duration(Duration::fixed(7200.0))
                .with_start(start),
        );

        let outcome = HtnPlanner::new(PlanOptions::default())
            .plan(
                &domain,
                &State::new(),
                vec![TodoItem::task("brew", vec![])],
            )
            .unwrap();

        let tree = &outcome.tree;
        let brew_id = tree.get_primitive_actions(tree.root_id())[0];
        let instance = instance_name("brew", brew_id);

        let mut stn = compose_plan_network(&domain, tree).unwrap().unwrap();
        assert_eq!(
            stn.get_constraint(&start_point(&instance), &end_point(&instance)),
            Some(Bound::exact(7200.0))
        );
        assert!(stn.is_consistent());

        // The derived end is two hours past the anchor.
        let derived = TemporalPattern::new(Some(start), None, Some(7200.0))
            .resolve()
            .unwrap();
        assert_eq!(
            derived.end.unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 22, 19, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_instant_plan_has_no_network() {
        let mut domain = Domain::new("instant");
        domain.register_action(ActionSpec::new("wave", noop_effect()));

        let outcome = HtnPlanner::new(PlanOptions::default())
            .plan(&domain, &State::new(), vec![TodoItem::task("wave", vec![])])
            .unwrap();

        assert!(compose_plan_network(&domain, &outcome.tree)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sequential_precedence_between_primitives() {
        let mut domain = Domain::new("kitchen");
        domain.register_action(
            ActionSpec::new("boil", noop_effect()).with_duration(Duration::fixed(300.0)),
        );
        domain.register_action(
            ActionSpec::new("serve", noop_effect()).with_duration(Duration::fixed(60.0)),
        );

        let outcome = HtnPlanner::new(PlanOptions::default())
            .plan(
                &domain,
                &State::new(),
                vec![
                    TodoItem::task("boil", vec![]),
                    TodoItem::task("serve", vec![]),
                ],
            )
            .unwrap();

        let tree = &outcome.tree;
        let primitives = tree.get_primitive_actions(tree.root_id());
        let boil = instance_name("boil", primitives[0]);
        let serve = instance_name("serve", primitives[1]);

        let mut stn = compose_plan_network(&domain, tree).unwrap().unwrap();
        let bound = stn
            .get_constraint(&end_point(&boil), &start_point(&serve))
            .unwrap();
        assert_eq!(bound.min, 0.0);
        assert_eq!(bound.max, f64::INFINITY);
        assert!(stn.is_consistent());
    }

    #[test]
    fn test_conflicting_anchors_are_inconsistent() {
        let noon = Utc.with_ymd_and_hms(2025, 6, 22, 12, 0, 0).unwrap();

        let mut domain = Domain::new("double_booked");
        // Both actions are pinned to noon, but sequential order forces the
        // second to wait for the first to end.
        domain.register_action(
            ActionSpec::new("long_meeting", noop_effect())
                .with_duration(Duration::fixed(3600.0))
                .with_start(noon),
        );
        domain.register_action(
            ActionSpec::new("lunch", noop_effect())
                .with_duration(Duration::fixed(1800.0))
                .with_start(noon),
        );

        let planner = HtnPlanner::new(PlanOptions::default());
        let err = planner
            .plan(
                &domain,
                &State::new(),
                vec![
                    TodoItem::task("long_meeting", vec![]),
                    TodoItem::task("lunch", vec![]),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, common::Error::InconsistentPlan(_)));
    }

    #[test]
    fn test_deadline_constraint_enforced() {
        let ten = Utc.with_ymd_and_hms(2025, 6, 22, 10, 0, 0).unwrap();
        let eleven = Utc.with_ymd_and_hms(2025, 6, 22, 11, 0, 0).unwrap();
        let one = Utc.with_ymd_and_hms(2025, 6, 22, 13, 0, 0).unwrap();

        let build = |deadline| {
            let mut specs = TemporalSpecifications::new();
            specs
                .add_action_duration("brew", Duration::fixed(7200.0))
                .unwrap();
            specs.add_constraint("brew", TemporalConstraint::Deadline { at: deadline });

            let mut domain = Domain::new("brewery").with_temporal_specs(specs);
            domain.register_action(ActionSpec::new("brew", noop_effect()).with_start(ten));
            domain
        };

        // Two hours of brewing from 10:00 cannot end by 11:00.
        let err = HtnPlanner::new(PlanOptions::default())
            .plan(
                &build(eleven),
                &State::new(),
                vec![TodoItem::task("brew", vec![])],
            )
            .unwrap_err();
        assert!(matches!(err, common::Error::InconsistentPlan(_)));

        // A 13:00 deadline leaves room.
        assert!(HtnPlanner::new(PlanOptions::default())
            .plan(
                &build(one),
                &State::new(),
                vec![TodoItem::task("brew", vec![])],
            )
            .is_ok());
    }

    #[test]
    fn test_earliest_start_and_window_bounds() {
        let nine = Utc.with_ymd_and_hms(2025, 6, 22, 9, 0, 0).unwrap();
        let ten = Utc.with_ymd_and_hms(2025, 6, 22, 10, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2025, 6, 22, 12, 0, 0).unwrap();

        let mut specs = TemporalSpecifications::new();
        specs
            .add_action_duration("bake", Duration::fixed(1800.0))
            .unwrap();
        specs.add_constraint("bake", TemporalConstraint::EarliestStart { at: ten });
        specs.add_constraint(
            "bake",
            TemporalConstraint::ResourceAvailability {
                resource: "oven".to_string(),
                from: nine,
                until: noon,
            },
        );

        let mut domain = Domain::new("bakery").with_temporal_specs(specs);
        domain.register_action(ActionSpec::new("bake", noop_effect()));

        let outcome = HtnPlanner::new(PlanOptions::default())
            .plan(&domain, &State::new(), vec![TodoItem::task("bake", vec![])])
            .unwrap();

        let tree = &outcome.tree;
        let instance = instance_name("bake", tree.get_primitive_actions(tree.root_id())[0]);
        let mut stn = compose_plan_network(&domain, tree).unwrap().unwrap();

        // Offsets are relative to 09:00, the earliest referenced instant.
        let start_bound = stn
            .get_constraint(ORIGIN_POINT, &start_point(&instance))
            .unwrap();
        assert_eq!(start_bound.min, 3600.0);
        let end_bound = stn
            .get_constraint(ORIGIN_POINT, &end_point(&instance))
            .unwrap();
        assert_eq!(end_bound.max, 10800.0);
        assert!(stn.is_consistent());
    }

    #[test]
    fn test_resource_dependent_duration_uses_matched_entity() {
        let mut registry = EntityRegistry::new();
        registry.register_entity_type(
            EntitySpec::new("chef")
                .with_capability("cooking")
                .with_property("skill_level", json!("expert")),
        );

        let mut specs = TemporalSpecifications::new();
        specs
            .add_action_duration(
                "cook",
                Duration::ResourceDependent {
                    base: 100.0,
                    resource_type: "chef".to_string(),
                    efficiency: BTreeMap::from([
                        ("expert".to_string(), 2.0),
                        ("novice".to_string(), 0.5),
                    ]),
                },
            )
            .unwrap();

        let mut domain = Domain::new("kitchen")
            .with_entity_registry(registry)
            .with_temporal_specs(specs);
        domain.register_action(
            ActionSpec::new("cook", noop_effect()).with_entity_requirement(
                EntityRequirement::new("chef").with_capability("cooking"),
            ),
        );

        let outcome = HtnPlanner::new(PlanOptions::default())
            .plan(&domain, &State::new(), vec![TodoItem::task("cook", vec![])])
            .unwrap();

        let tree = &outcome.tree;
        let instance = instance_name("cook", tree.get_primitive_actions(tree.root_id())[0]);
        let mut stn = compose_plan_network(&domain, tree).unwrap().unwrap();

        // The expert chef halves the base duration: 100 / 2.0.
        assert_eq!(
            stn.get_constraint(&start_point(&instance), &end_point(&instance)),
            Some(Bound::exact(50.0))
        );
        assert!(stn.is_consistent());
    }

    #[test]
    fn test_is_durative() {
        let mut domain = Domain::new("mixed");
        domain.register_action(
            ActionSpec::new("boil", noop_effect()).with_duration(Duration::fixed(300.0)),
        );
        domain.register_action(ActionSpec::new("wave", noop_effect()));

        assert!(is_durative(&domain, "boil"));
        assert!(!is_durative(&domain, "wave"));
        assert!(!is_durative(&domain, "unknown"));
    }
}
