//! Execution driver.
//!
//! Walks a refined solution tree in depth-first order and applies each
//! primitive action's effect to a running state. Actions are assumed to
//! succeed; commands may fail at execution time, which blacklists the
//! method that introduced them, discards the failed subtree, and replans
//! from the parent against the partially executed state.

use crate::engine::{HtnPlanner, PlanOptions};
use crate::tree::{NodeId, NodeTask, SolutionTree};
use common::{Error, Result};
use domain::{Domain, TodoItem};
use state::State;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of executing a tree: the threaded-through state plus the tree,
/// which may have been rewritten by replanning.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub tree: SolutionTree,
    pub final_state: State,
}

/// Sequential primitive-action executor with replanning hooks.
pub struct ExecutionDriver {
    opts: PlanOptions,
    cancel: CancellationToken,
}

impl ExecutionDriver {
    pub fn new(opts: PlanOptions) -> Self {
        Self {
            opts,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(opts: PlanOptions, cancel: CancellationToken) -> Self {
        Self { opts, cancel }
    }

    /// Token that cooperatively stops execution between primitives.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute every primitive in depth-first child order.
    pub fn execute(
        &self,
        domain: &Domain,
        tree: SolutionTree,
        state: &State,
    ) -> Result<ExecutionOutcome> {
        let planner = HtnPlanner::new(self.opts.clone());
        let mut tree = tree;
        let mut current = state.clone();
        let mut executed: HashSet<NodeId> = HashSet::new();

        'replay: loop {
            let primitives = tree.get_primitive_actions(tree.root_id());
            for id in primitives {
                if executed.contains(&id) {
                    continue;
                }
                if self.cancel.is_cancelled() {
                    info!("execution cancelled; returning current state");
                    return Ok(ExecutionOutcome {
                        tree,
                        final_state: current,
                    });
                }

                let node = tree.node(id)?;
                let NodeTask::Todo(todo) = node.task.clone() else {
                    continue;
                };
                match todo {
                    TodoItem::Task { name, args } => {
                        if let Some(action) = domain.action(&name) {
                            debug!(action = %name, "applying action effect");
                            current = (action.effect)(&current, &args)?;
                            tree.node_mut(id)?.visited = true;
                            executed.insert(id);
                        } else if let Some(command) = domain.command(&name) {
                            match (command.effect)(&current, &args) {
                                Ok(next) => {
                                    debug!(command = %name, "command succeeded");
                                    current = next;
                                    tree.node_mut(id)?.visited = true;
                                    executed.insert(id);
                                }
                                Err(err) => {
                                    warn!(command = %name, %err, "command failed; replanning");
                                    self.replan_after_command_failure(
                                        &planner, domain, &mut tree, id, &name, &current, err,
                                    )?;
                                    continue 'replay;
                                }
                            }
                        } else {
                            return Err(Error::NotFound(format!(
                                "no action or command named '{}'",
                                name
                            )));
                        }
                    }
                    // Primitive goals belong to an external executor; they
                    // carry no effect to apply here.
                    TodoItem::Goal(_) | TodoItem::Multigoal(_) => {
                        executed.insert(id);
                    }
                }
            }
            break;
        }

        Ok(ExecutionOutcome {
            tree,
            final_state: current,
        })
    }

    /// Blacklist the method that introduced a failed command, discard its
    /// subtree, cache the partially executed state everywhere, and refine
    /// the re-opened node again.
    #[allow(clippy::too_many_arguments)]
    fn replan_after_command_failure(
        &self,
        planner: &HtnPlanner,
        domain: &Domain,
        tree: &mut SolutionTree,
        failed: NodeId,
        command: &str,
        current: &State,
        err: Error,
    ) -> Result<()> {
        tree.blacklist_command(command);

        let mut cursor = failed;
        let reopened = loop {
            let Some(parent) = tree.node(cursor)?.parent else {
                return Err(Error::CommandFailure(format!(
                    "command '{}' failed with no introducing method to blacklist: {}",
                    command, err
                )));
            };
            if let Some(method) = tree.node(parent)?.method_tried.clone() {
                info!(command, method = %method, node = %parent, "blacklisting introducing method");
                tree.remove_descendants(parent);
                let node = tree.node_mut(parent)?;
                node.blacklisted_methods.insert(method);
                node.method_tried = None;
                node.expanded = false;
                node.completed = false;
                break parent;
            }
            cursor = parent;
        };

        tree.update_cached_states(current);
        planner.replan(domain, tree)?;
        debug!(node = %reopened, "replanning complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ActionSpec, CommandSpec, EffectFn, TaskMethodFn};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn set_fact_effect(predicate: &'static str, subject: &'static str) -> EffectFn {
        Arc::new(move |state: &State, _: &[Value]| {
            let mut next = state.clone();
            next.set_fact(predicate, subject, json!(true));
            Ok(next)
        })
    }

    fn plan_tree(domain: &Domain, state: &State, todos: Vec<TodoItem>) -> SolutionTree {
        HtnPlanner::new(PlanOptions::default())
            .plan(domain, state, todos)
            .unwrap()
            .tree
    }

    #[test]
    fn test_execute_threads_state_forward() {
        let mut domain = Domain::new("kitchen");
        domain.register_action(ActionSpec::new("boil", set_fact_effect("boiled", "water")));
        domain.register_action(ActionSpec::new("serve", set_fact_effect("served", "tea")));

        let state = State::new();
        let tree = plan_tree(
            &domain,
            &state,
            vec![TodoItem::task("boil", vec![]), TodoItem::task("serve", vec![])],
        );

        let outcome = ExecutionDriver::new(PlanOptions::default())
            .execute(&domain, tree, &state)
            .unwrap();
        assert!(outcome.final_state.matches("boiled", "water", &json!(true)));
        assert!(outcome.final_state.matches("served", "tea", &json!(true)));
        // The input state is untouched.
        assert!(state.is_empty());
    }

    #[test]
    fn test_command_failure_triggers_replanning() {
        let mut domain = Domain::new("kitchen");
        domain.register_command(CommandSpec::new(
            "risky_serve",
            Arc::new(|_: &State, _: &[Value]| {
                Err(Error::CommandFailure("tray dropped".to_string()))
            }),
        ));
        domain.register_action(ActionSpec::new("plate", set_fact_effect("served", "pasta")));

        let fast: TaskMethodFn =
            Arc::new(|_, _| Ok(vec![TodoItem::task("risky_serve", vec![])]));
        let careful: TaskMethodFn = Arc::new(|_, _| Ok(vec![TodoItem::task("plate", vec![])]));
        domain.register_task_method("serve_meal", "fast", fast);
        domain.register_task_method("serve_meal", "careful", careful);

        let state = State::new();
        let tree = plan_tree(&domain, &state, vec![TodoItem::task("serve_meal", vec![])]);

        let outcome = ExecutionDriver::new(PlanOptions::default())
            .execute(&domain, tree, &state)
            .unwrap();

        assert!(outcome.final_state.matches("served", "pasta", &json!(true)));
        assert!(outcome.tree.blacklisted_commands().contains("risky_serve"));

        let serve_id = outcome
            .tree
            .node(outcome.tree.root_id())
            .unwrap()
            .children[0];
        let serve_node = outcome.tree.node(serve_id).unwrap();
        assert_eq!(serve_node.method_tried.as_deref(), Some("careful"));
        assert!(serve_node.blacklisted_methods.contains("fast"));
    }

    #[test]
    fn test_command_failure_without_method_surfaces() {
        let mut domain = Domain::new("kitchen");
        domain.register_command(CommandSpec::new(
            "risky_serve",
            Arc::new(|_: &State, _: &[Value]| {
                Err(Error::CommandFailure("tray dropped".to_string()))
            }),
        ));

        let state = State::new();
        // The command sits directly under the root: no method to blame.
        let tree = plan_tree(&domain, &state, vec![TodoItem::task("risky_serve", vec![])]);

        let err = ExecutionDriver::new(PlanOptions::default())
            .execute(&domain, tree, &state)
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailure(_)));
    }

    #[test]
    fn test_partial_state_survives_replanning() {
        let mut domain = Domain::new("kitchen");
        domain.register_action(ActionSpec::new("prep", set_fact_effect("prepped", "pasta")));
        domain.register_command(CommandSpec::new(
            "flaky_cook",
            Arc::new(|_: &State, _: &[Value]| Err(Error::CommandFailure("burnt".to_string()))),
        ));
        domain.register_action(ActionSpec::new("microwave", set_fact_effect("cooked", "pasta")));

        let fancy: TaskMethodFn = Arc::new(|_, _| {
            Ok(vec![
                TodoItem::task("prep", vec![]),
                TodoItem::task("flaky_cook", vec![]),
            ])
        });
        let simple: TaskMethodFn =
            Arc::new(|_, _| Ok(vec![TodoItem::task("microwave", vec![])]));
        domain.register_task_method("cook", "fancy", fancy);
        domain.register_task_method("cook", "simple", simple);

        let state = State::new();
        let tree = plan_tree(&domain, &state, vec![TodoItem::task("cook", vec![])]);

        let outcome = ExecutionDriver::new(PlanOptions::default())
            .execute(&domain, tree, &state)
            .unwrap();

        // prep ran before the failure and its effect persists.
        assert!(outcome.final_state.matches("prepped", "pasta", &json!(true)));
        assert!(outcome.final_state.matches("cooked", "pasta", &json!(true)));
        // Replanning cached the partially executed state on the tree.
        let cook_id = outcome.tree.node(outcome.tree.root_id()).unwrap().children[0];
        assert!(outcome
            .tree
            .node(cook_id)
            .unwrap()
            .cached_state
            .matches("prepped", "pasta", &json!(true)));
    }

    #[test]
    fn test_cancellation_returns_current_state() {
        let mut domain = Domain::new("kitchen");
        domain.register_action(ActionSpec::new("boil", set_fact_effect("boiled", "water")));

        let state = State::new();
        let tree = plan_tree(&domain, &state, vec![TodoItem::task("boil", vec![])]);

        let driver = ExecutionDriver::new(PlanOptions::default());
        driver.cancellation_token().cancel();

        let outcome = driver.execute(&domain, tree, &state).unwrap();
        assert!(outcome.final_state.is_empty());
    }

    #[test]
    fn test_unknown_primitive_is_an_error() {
        let mut domain = Domain::new("kitchen");
        domain.register_action(ActionSpec::new("boil", set_fact_effect("boiled", "water")));

        let state = State::new();
        let tree = plan_tree(&domain, &state, vec![TodoItem::task("mystery", vec![])]);

        let err = ExecutionDriver::new(PlanOptions::default())
            .execute(&domain, tree, &state)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_primitive_goal_nodes_are_skipped() {
        let mut domain = Domain::new("kitchen");
        domain.register_action(ActionSpec::new("boil", set_fact_effect("boiled", "water")));

        let state = State::new();
        let tree = plan_tree(
            &domain,
            &state,
            vec![
                TodoItem::goal("status", "chef", json!("ready")),
                TodoItem::task("boil", vec![]),
            ],
        );

        let outcome = ExecutionDriver::new(PlanOptions::default())
            .execute(&domain, tree, &state)
            .unwrap();
        assert!(outcome.final_state.matches("boiled", "water", &json!(true)));
    }
}
