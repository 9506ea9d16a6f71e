//! Unified domain model.
//!
//! A [`Domain`] is the declarative registry the planner runs against:
//! primitive actions and execution-time commands, ordered task methods,
//! predicate-indexed unigoal methods, and multigoal/multitodo optimizers,
//! wired to an entity registry and temporal specifications. Domains are
//! built during setup and treated as immutable during planning.

use common::{Error, Result, Timestamp};
use entities::{EntityRegistry, EntityRequirement};
use serde_json::Value;
use state::State;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use temporal::{Duration, TemporalSpecifications};
use tracing::debug;

pub mod todo;

pub use todo::{Goal, Multigoal, TodoItem};

/// Pure state transformation of a primitive action. Preconditions and
/// temporal logic live in methods, not here.
pub type EffectFn = Arc<dyn Fn(&State, &[Value]) -> Result<State> + Send + Sync>;

/// Task decomposition: re-describes a task as an ordered todo list.
pub type TaskMethodFn = Arc<dyn Fn(&State, &[Value]) -> Result<Vec<TodoItem>> + Send + Sync>;

/// Goal decomposition for a single predicate, given `(subject, value)`.
pub type UnigoalMethodFn =
    Arc<dyn Fn(&State, &str, &Value) -> Result<Vec<TodoItem>> + Send + Sync>;

/// Multigoal optimizer: rewrites the multigoal or expands it to todos.
pub type MultigoalMethodFn =
    Arc<dyn Fn(&State, &Multigoal) -> Result<MultigoalResponse> + Send + Sync>;

/// Multi-todo optimizer: reorders or parallelizes a todo list.
pub type MultitodoMethodFn =
    Arc<dyn Fn(&State, &[TodoItem]) -> Result<Vec<TodoItem>> + Send + Sync>;

/// Outcome of a multigoal method.
#[derive(Clone)]
pub enum MultigoalResponse {
    /// A rewritten or reordered multigoal to plan instead
    Rewritten(Multigoal),
    /// Direct expansion into a todo list
    Todos(Vec<TodoItem>),
}

/// A primitive action: planning-time, assumed to succeed at execution.
#[derive(Clone)]
pub struct ActionSpec {
    pub name: String,
    pub duration: Duration,
    pub entity_requirements: Vec<EntityRequirement>,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub effect: EffectFn,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, effect: EffectFn) -> Self {
        Self {
            name: name.into(),
            duration: Duration::fixed(0.0),
            entity_requirements: Vec::new(),
            start: None,
            end: None,
            effect,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_entity_requirement(mut self, requirement: EntityRequirement) -> Self {
        self.entity_requirements.push(requirement);
        self
    }

    pub fn with_start(mut self, start: Timestamp) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: Timestamp) -> Self {
        self.end = Some(end);
        self
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("duration", &self.duration)
            .field("entity_requirements", &self.entity_requirements)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("effect", &"<fn>")
            .finish()
    }
}

/// An execution-time command: same shape as an action, but its effect may
/// fail and trigger replanning.
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub duration: Duration,
    pub entity_requirements: Vec<EntityRequirement>,
    pub effect: EffectFn,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, effect: EffectFn) -> Self {
        Self {
            name: name.into(),
            duration: Duration::fixed(0.0),
            entity_requirements: Vec::new(),
            effect,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("duration", &self.duration)
            .field("effect", &"<fn>")
            .finish()
    }
}

/// A named method record; blacklisting refers to methods by name.
#[derive(Clone)]
pub struct Method<F> {
    pub name: String,
    pub func: F,
}

impl<F> fmt::Debug for Method<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("name", &self.name).finish()
    }
}

pub type TaskMethod = Method<TaskMethodFn>;
pub type UnigoalMethod = Method<UnigoalMethodFn>;
pub type MultigoalMethod = Method<MultigoalMethodFn>;
pub type MultitodoMethod = Method<MultitodoMethodFn>;

/// The declarative planning domain.
#[derive(Clone, Default)]
pub struct Domain {
    pub name: String,
    actions: HashMap<String, ActionSpec>,
    commands: HashMap<String, CommandSpec>,
    /// task name -> methods in declared order
    task_methods: HashMap<String, Vec<TaskMethod>>,
    /// goal predicate -> methods in declared order
    unigoal_methods: HashMap<String, Vec<UnigoalMethod>>,
    multigoal_methods: Vec<MultigoalMethod>,
    multitodo_methods: Vec<MultitodoMethod>,
    entity_registry: Option<EntityRegistry>,
    temporal_specs: Option<TemporalSpecifications>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Register a primitive action, replacing any previous spec of the
    /// same name.
    pub fn register_action(&mut self, spec: ActionSpec) {
        debug!(domain = %self.name, action = %spec.name, "registered action");
        self.actions.insert(spec.name.clone(), spec);
    }

    /// Register an execution-time command.
    pub fn register_command(&mut self, spec: CommandSpec) {
        debug!(domain = %self.name, command = %spec.name, "registered command");
        self.commands.insert(spec.name.clone(), spec);
    }

    /// Append a task method; methods are tried in registration order.
    pub fn register_task_method(
        &mut self,
        task_name: impl Into<String>,
        method_name: impl Into<String>,
        func: TaskMethodFn,
    ) {
        self.task_methods
            .entry(task_name.into())
            .or_default()
            .push(Method {
                name: method_name.into(),
                func,
            });
    }

    /// Append a unigoal method for a predicate.
    pub fn register_unigoal_method(
        &mut self,
        predicate: impl Into<String>,
        method_name: impl Into<String>,
        func: UnigoalMethodFn,
    ) {
        self.unigoal_methods
            .entry(predicate.into())
            .or_default()
            .push(Method {
                name: method_name.into(),
                func,
            });
    }

    pub fn register_multigoal_method(
        &mut self,
        method_name: impl Into<String>,
        func: MultigoalMethodFn,
    ) {
        self.multigoal_methods.push(Method {
            name: method_name.into(),
            func,
        });
    }

    pub fn register_multitodo_method(
        &mut self,
        method_name: impl Into<String>,
        func: MultitodoMethodFn,
    ) {
        self.multitodo_methods.push(Method {
            name: method_name.into(),
            func,
        });
    }

    pub fn with_entity_registry(mut self, registry: EntityRegistry) -> Self {
        self.entity_registry = Some(registry);
        self
    }

    pub fn with_temporal_specs(mut self, specs: TemporalSpecifications) -> Self {
        self.temporal_specs = Some(specs);
        self
    }

    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn task_methods(&self, task_name: &str) -> &[TaskMethod] {
        self.task_methods
            .get(task_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn unigoal_methods(&self, predicate: &str) -> &[UnigoalMethod] {
        self.unigoal_methods
            .get(predicate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn multigoal_methods(&self) -> &[MultigoalMethod] {
        &self.multigoal_methods
    }

    pub fn multitodo_methods(&self) -> &[MultitodoMethod] {
        &self.multitodo_methods
    }

    pub fn entity_registry(&self) -> Option<&EntityRegistry> {
        self.entity_registry.as_ref()
    }

    pub fn temporal_specs(&self) -> Option<&TemporalSpecifications> {
        self.temporal_specs.as_ref()
    }

    /// A domain with no actions, commands or methods has nothing to plan
    /// with.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
            && self.commands.is_empty()
            && self.task_methods.is_empty()
            && self.unigoal_methods.is_empty()
            && self.multigoal_methods.is_empty()
    }

    /// Combine two domains; `other` wins on name collisions. Task and
    /// unigoal method lists are replaced wholesale on collision so the
    /// right-hand declaration order is preserved; optimizer lists are
    /// concatenated.
    pub fn merge(&self, other: &Domain) -> Domain {
        let mut merged = self.clone();
        merged.name = format!("{}+{}", self.name, other.name);
        for (name, spec) in &other.actions {
            merged.actions.insert(name.clone(), spec.clone());
        }
        for (name, spec) in &other.commands {
            merged.commands.insert(name.clone(), spec.clone());
        }
        for (task, methods) in &other.task_methods {
            merged.task_methods.insert(task.clone(), methods.clone());
        }
        for (predicate, methods) in &other.unigoal_methods {
            merged
                .unigoal_methods
                .insert(predicate.clone(), methods.clone());
        }
        merged
            .multigoal_methods
            .extend(other.multigoal_methods.iter().cloned());
        merged
            .multitodo_methods
            .extend(other.multitodo_methods.iter().cloned());
        if other.entity_registry.is_some() {
            merged.entity_registry = other.entity_registry.clone();
        }
        if other.temporal_specs.is_some() {
            merged.temporal_specs = other.temporal_specs.clone();
        }
        merged
    }

    /// Structural validation: required fields are present, durations are
    /// well-formed, and every entity type referenced by an action resolves
    /// in the attached registry. Method behavior is not checked statically.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("domain name is empty".to_string()));
        }
        for (name, action) in &self.actions {
            if name.is_empty() || action.name != *name {
                return Err(Error::Validation(format!(
                    "action registered under '{}' declares name '{}'",
                    name, action.name
                )));
            }
            action.duration.validate()?;
            if let Some(registry) = &self.entity_registry {
                for requirement in &action.entity_requirements {
                    if registry.get_by_type(&requirement.entity_type).is_none() {
                        return Err(Error::Validation(format!(
                            "action '{}' requires unknown entity type '{}'",
                            name, requirement.entity_type
                        )));
                    }
                }
            }
        }
        for (name, command) in &self.commands {
            if name.is_empty() || command.name != *name {
                return Err(Error::Validation(format!(
                    "command registered under '{}' declares name '{}'",
                    name, command.name
                )));
            }
            command.duration.validate()?;
        }
        for predicate in self.unigoal_methods.keys() {
            if predicate.is_empty() {
                return Err(Error::Validation(
                    "unigoal method registered for empty predicate".to_string(),
                ));
            }
        }
        if let Some(registry) = &self.entity_registry {
            registry.validate_registry()?;
        }
        Ok(())
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.name)
            .field("actions", &self.actions.len())
            .field("commands", &self.commands.len())
            .field("task_methods", &self.task_methods.len())
            .field("unigoal_methods", &self.unigoal_methods.len())
            .field("multigoal_methods", &self.multigoal_methods.len())
            .field("multitodo_methods", &self.multitodo_methods.len())
            .finish()
    }
}
