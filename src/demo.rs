//! Built-in demo scenarios for the CLI.

use common::{Error, Result};
use domain::{ActionSpec, CommandSpec, Domain, EffectFn, TodoItem};
use entities::{EntityRegistry, EntitySpec, EntityRequirement};
use serde_json::{json, Value};
use state::State;
use std::sync::Arc;
use temporal::{parse_iso8601, TemporalSpecifications};

/// Build the named demo scenario: domain, initial state, and todos.
pub fn scenario(name: &str) -> Result<(Domain, State, Vec<TodoItem>)> {
    match name {
        "kitchen" => Ok(kitchen()),
        "backtrack" => Ok(backtrack()),
        other => Err(Error::InvalidInput(format!(
            "unknown scenario '{}'; try kitchen or backtrack",
            other
        ))),
    }
}

fn set_fact(predicate: &'static str) -> EffectFn {
    Arc::new(move |state: &State, args: &[Value]| {
        let subject = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput(format!("{} needs a subject", predicate)))?;
        let mut next = state.clone();
        next.set_fact(predicate, subject, json!(true));
        Ok(next)
    })
}

/// Meal preparation: entity-gated durative actions, a goal solved through
/// a unigoal method, and a serving command.
fn kitchen() -> (Domain, State, Vec<TodoItem>) {
    let mut registry = EntityRegistry::new();
    registry.register_entity_type(
        EntitySpec::new("chef")
            .with_capability("cooking")
            .with_capability("plating")
            .with_property("skill_level", json!("expert")),
    );
    registry.register_entity_type(EntitySpec::new("oven").with_capability("baking"));

    let mut specs = TemporalSpecifications::new();
    for (action, duration) in [
        ("gather_ingredients", "PT10M"),
        ("cook_meal", "PT30M"),
        ("plate", "PT2M"),
    ] {
        specs
            .add_action_duration(action, parse_iso8601(duration).expect("literal duration"))
            .expect("valid duration");
    }

    let mut domain = Domain::new("kitchen")
        .with_entity_registry(registry)
        .with_temporal_specs(specs);

    domain.register_action(ActionSpec::new("gather_ingredients", set_fact("ingredients_ready")));
    domain.register_action(
        ActionSpec::new("cook_meal", set_fact("cooked")).with_entity_requirement(
            EntityRequirement::new("chef").with_capability("cooking"),
        ),
    );
    domain.register_action(
        ActionSpec::new("plate", set_fact("plated")).with_entity_requirement(
            EntityRequirement::new("chef").with_capability("plating"),
        ),
    );
    domain.register_command(CommandSpec::new(
        "serve_meal",
        Arc::new(|state: &State, args: &[Value]| {
            let dish = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidInput("serve_meal needs a dish".to_string()))?;
            if !state.matches("plated", dish, &json!(true)) {
                return Err(Error::CommandFailure(format!("{} is not plated yet", dish)));
            }
            let mut next = state.clone();
            next.set_fact("served", dish, json!(true));
            Ok(next)
        }),
    ));

    domain.register_unigoal_method(
        "ingredients_ready",
        "gather_from_pantry",
        Arc::new(|state: &State, subject: &str, _value: &Value| {
            if state.matches("stocked", "pantry", &json!(true)) {
                Ok(vec![TodoItem::task(
                    "gather_ingredients",
                    vec![json!(subject)],
                )])
            } else {
                Err(Error::MethodFailure("pantry is empty".to_string()))
            }
        }),
    );

    domain.register_task_method(
        "prepare_meal",
        "cook_fresh",
        Arc::new(|_state: &State, args: &[Value]| {
            let dish = args.first().cloned().unwrap_or_else(|| json!("pasta"));
            let dish_name = dish.as_str().unwrap_or("pasta").to_string();
            Ok(vec![
                TodoItem::goal("ingredients_ready", dish_name, json!(true)),
                TodoItem::task("cook_meal", vec![dish.clone()]),
                TodoItem::task("plate", vec![dish.clone()]),
                TodoItem::task("serve_meal", vec![dish]),
            ])
        }),
    );

    let mut state = State::new();
    state.set_fact("status", "chef", json!("available"));
    state.set_fact("stocked", "pantry", json!(true));

    let todos = vec![TodoItem::task("prepare_meal", vec![json!("pasta")])];
    (domain, state, todos)
}

/// Two methods for one task; the first always fails, so planning must
/// blacklist it and fall back.
fn backtrack() -> (Domain, State, Vec<TodoItem>) {
    let mut domain = Domain::new("backtrack");
    domain.register_action(ActionSpec::new("order_takeout", set_fact("fed")));

    domain.register_task_method(
        "get_dinner",
        "home_cooking",
        Arc::new(|_state: &State, _args: &[Value]| {
            Err(Error::MethodFailure("no groceries at home".to_string()))
        }),
    );
    domain.register_task_method(
        "get_dinner",
        "takeout",
        Arc::new(|_state: &State, _args: &[Value]| {
            Ok(vec![TodoItem::task("order_takeout", vec![json!("household")])])
        }),
    );

    let state = State::new();
    let todos = vec![TodoItem::task("get_dinner", vec![])];
    (domain, state, todos)
}
