//! Breadth-first HTN refinement engine.
//!
//! The planning loop repeatedly picks the first unexpanded node in
//! creation order and dispatches on its todo variant. Method decomposition
//! is a pure re-description of remaining work: children inherit the
//! parent's cached state unchanged, and state only advances at execution
//! time. Backtracking blacklists the method tried at the nearest ancestor
//! that chose one, discards that subtree, and re-expands.

use crate::schedule;
use crate::tree::{NodeId, NodeTask, SolutionTree, TreeStats};
use common::{Error, PlanId, Result, Timestamp};
use domain::{Domain, Goal, Multigoal, MultigoalResponse, TodoItem};
use state::State;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name recorded when the built-in multigoal fallback expands a multigoal
/// into its unsatisfied goals.
const DEFAULT_MULTIGOAL_METHOD: &str = "split_unsatisfied_goals";

/// Options accepted by the planning API. Unknown, domain-specific options
/// are the caller's concern and never reach the engine.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// 0..=3; governs optional trace output only, never results
    pub verbose: u8,
    /// Iteration bound on the unexpanded-node loop (not tree depth)
    pub max_depth: usize,
    /// Re-check each goal against the projected execution state
    pub verify_goals: bool,
    /// Wall-clock budget handed to the external solver, when one is used
    pub solver_timeout_ms: Option<u64>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            verbose: 0,
            max_depth: 100,
            verify_goals: false,
            solver_timeout_ms: None,
        }
    }
}

impl PlanOptions {
    pub fn validate(&self) -> Result<()> {
        if self.verbose > 3 {
            return Err(Error::InvalidInput(format!(
                "verbose must be 0..=3, got {}",
                self.verbose
            )));
        }
        if self.max_depth == 0 {
            return Err(Error::InvalidInput(
                "max_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metadata describing one planning run.
#[derive(Debug, Clone)]
pub struct PlanMetadata {
    pub plan_id: PlanId,
    pub created_at: Timestamp,
    pub iterations: usize,
    pub backtracks: usize,
    pub depth_exceeded: bool,
    pub stats: TreeStats,
}

/// A planning result: the refined tree plus run metadata.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub tree: SolutionTree,
    pub metadata: PlanMetadata,
}

/// The HTN planner. Holds no mutable state; each call owns its tree.
#[derive(Debug, Clone, Default)]
pub struct HtnPlanner {
    opts: PlanOptions,
}

impl HtnPlanner {
    pub fn new(opts: PlanOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &PlanOptions {
        &self.opts
    }

    /// Plan a todo list against a domain and initial state. Planning never
    /// mutates the given state.
    pub fn plan(
        &self,
        domain: &Domain,
        state: &State,
        todos: Vec<TodoItem>,
    ) -> Result<PlanOutcome> {
        self.opts.validate()?;
        if domain.is_empty() {
            return Err(Error::InvalidInput(format!(
                "domain '{}' has no actions or methods",
                domain.name
            )));
        }

        self.vlog(1, || {
            format!(
                "planning {} todos against domain '{}'",
                todos.len(),
                domain.name
            )
        });

        let todos = self.optimize_todos(domain, state, todos);
        let mut tree = SolutionTree::create_initial(todos, state);
        let mut iterations = 0;
        let mut backtracks = 0;
        let mut depth_exceeded = false;

        loop {
            self.expand_loop(
                domain,
                &mut tree,
                &mut iterations,
                &mut backtracks,
                &mut depth_exceeded,
            )?;
            if depth_exceeded || !self.opts.verify_goals {
                break;
            }
            if self.verify_goals_pass(domain, &mut tree)? {
                backtracks += 1;
            } else {
                break;
            }
        }

        if !depth_exceeded {
            if let Some(mut stn) = schedule::compose_plan_network(domain, &tree)? {
                if !stn.is_consistent() {
                    return Err(Error::InconsistentPlan(format!(
                        "temporal network over {} points is unsatisfiable",
                        stn.time_points().len()
                    )));
                }
            }
        }

        let stats = tree.stats();
        self.vlog(1, || {
            format!(
                "planning finished: {} nodes, {} primitive actions, {} backtracks",
                stats.total_nodes, stats.primitive_actions, backtracks
            )
        });

        Ok(PlanOutcome {
            tree,
            metadata: PlanMetadata {
                plan_id: PlanId::new(),
                created_at: common::now(),
                iterations,
                backtracks,
                depth_exceeded,
                stats,
            },
        })
    }

    /// Continue refining an existing tree until no unexpanded node
    /// remains. Used by the execution driver after a command failure.
    pub fn replan(&self, domain: &Domain, tree: &mut SolutionTree) -> Result<()> {
        let mut iterations = 0;
        let mut backtracks = 0;
        let mut depth_exceeded = false;
        self.expand_loop(
            domain,
            tree,
            &mut iterations,
            &mut backtracks,
            &mut depth_exceeded,
        )?;
        if depth_exceeded {
            return Err(Error::DepthExceeded(iterations));
        }
        Ok(())
    }

    /// Let registered multitodo optimizers reorder the root todo list;
    /// the first one that succeeds wins.
    fn optimize_todos(
        &self,
        domain: &Domain,
        state: &State,
        todos: Vec<TodoItem>,
    ) -> Vec<TodoItem> {
        for method in domain.multitodo_methods() {
            match (method.func)(state, &todos) {
                Ok(optimized) => {
                    self.vlog(2, || {
                        format!("multitodo method '{}' reordered the todo list", method.name)
                    });
                    return optimized;
                }
                Err(err) => {
                    debug!(method = %method.name, %err, "multitodo method failed; skipping");
                }
            }
        }
        todos
    }

    fn expand_loop(
        &self,
        domain: &Domain,
        tree: &mut SolutionTree,
        iterations: &mut usize,
        backtracks: &mut usize,
        depth_exceeded: &mut bool,
    ) -> Result<()> {
        while let Some(id) = tree.next_unexpanded() {
            if *iterations >= self.opts.max_depth {
                warn!(
                    iterations = *iterations,
                    "max_depth reached; returning the partial tree"
                );
                *depth_exceeded = true;
                return Ok(());
            }
            *iterations += 1;

            if let Err(err) = self.expand_node(domain, tree, id) {
                if err.is_method_level() {
                    self.backtrack(tree, id, err)?;
                    *backtracks += 1;
                } else {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn expand_node(&self, domain: &Domain, tree: &mut SolutionTree, id: NodeId) -> Result<()> {
        tree.node_mut(id)?.visited = true;
        let task = tree.node(id)?.task.clone();
        let state = tree.node(id)?.cached_state.clone();

        match task {
            NodeTask::Root(todos) => {
                self.vlog(2, || format!("expanding root into {} todos", todos.len()));
                for todo in todos {
                    tree.add_child(id, todo, state.clone())?;
                }
                tree.node_mut(id)?.expanded = true;
                Ok(())
            }
            NodeTask::Todo(TodoItem::Task { name, args }) => {
                self.expand_task(domain, tree, id, &state, &name, &args)
            }
            NodeTask::Todo(TodoItem::Goal(goal)) => {
                self.expand_goal(domain, tree, id, &state, &goal)
            }
            NodeTask::Todo(TodoItem::Multigoal(multigoal)) => {
                self.expand_multigoal(domain, tree, id, &state, &multigoal)
            }
        }
    }

    fn expand_task(
        &self,
        domain: &Domain,
        tree: &mut SolutionTree,
        id: NodeId,
        state: &Arc<State>,
        name: &str,
        args: &[serde_json::Value],
    ) -> Result<()> {
        let methods = domain.task_methods(name);
        if methods.is_empty() {
            // No methods is not an error: the task is a direct action.
            debug!(task = name, "no methods; marking primitive");
            return self.mark_primitive(domain, tree, id, name);
        }

        for method in methods {
            if tree.node(id)?.blacklisted_methods.contains(&method.name) {
                continue;
            }
            self.vlog(2, || format!("trying method '{}' on ({})", method.name, name));
            match (method.func)(state, args) {
                Ok(subtodos) => {
                    return self.apply_decomposition(tree, id, &method.name, subtodos, state)
                }
                Err(err) => {
                    debug!(method = %method.name, task = name, %err, "method failed");
                    tree.node_mut(id)?
                        .blacklisted_methods
                        .insert(method.name.clone());
                }
            }
        }

        Err(Error::MethodFailure(format!("Cannot solve task ({})", name)))
    }

    fn expand_goal(
        &self,
        domain: &Domain,
        tree: &mut SolutionTree,
        id: NodeId,
        state: &Arc<State>,
        goal: &Goal,
    ) -> Result<()> {
        if goal.is_satisfied(state) {
            self.vlog(2, || {
                format!(
                    "goal {}({}) already satisfied",
                    goal.predicate, goal.subject
                )
            });
            let node = tree.node_mut(id)?;
            node.completed = true;
            node.expanded = true;
            return Ok(());
        }

        let methods = domain.unigoal_methods(&goal.predicate);
        for method in methods {
            if tree.node(id)?.blacklisted_methods.contains(&method.name) {
                continue;
            }
            match (method.func)(state, &goal.subject, &goal.value) {
                Ok(subtodos) => {
                    return self.apply_decomposition(tree, id, &method.name, subtodos, state)
                }
                Err(err) => {
                    debug!(method = %method.name, predicate = %goal.predicate, %err, "unigoal method failed");
                    tree.node_mut(id)?
                        .blacklisted_methods
                        .insert(method.name.clone());
                }
            }
        }

        // No method solved the goal: hand it to an external executor as-is.
        debug!(predicate = %goal.predicate, "goal has no applicable method; marking primitive");
        let node = tree.node_mut(id)?;
        node.is_primitive = true;
        node.expanded = true;
        Ok(())
    }

    fn expand_multigoal(
        &self,
        domain: &Domain,
        tree: &mut SolutionTree,
        id: NodeId,
        state: &Arc<State>,
        multigoal: &Multigoal,
    ) -> Result<()> {
        if multigoal.is_satisfied(state) {
            let node = tree.node_mut(id)?;
            node.completed = true;
            node.expanded = true;
            return Ok(());
        }

        for method in domain.multigoal_methods() {
            if tree.node(id)?.blacklisted_methods.contains(&method.name) {
                continue;
            }
            match (method.func)(state, multigoal) {
                Ok(MultigoalResponse::Rewritten(rewritten)) => {
                    let node_method = method.name.clone();
                    tree.add_child(id, TodoItem::Multigoal(rewritten), state.clone())?;
                    let node = tree.node_mut(id)?;
                    node.method_tried = Some(node_method);
                    node.expanded = true;
                    return Ok(());
                }
                Ok(MultigoalResponse::Todos(subtodos)) => {
                    return self.apply_decomposition(tree, id, &method.name, subtodos, state)
                }
                Err(err) => {
                    debug!(method = %method.name, multigoal = %multigoal.name, %err, "multigoal method failed");
                    tree.node_mut(id)?
                        .blacklisted_methods
                        .insert(method.name.clone());
                }
            }
        }

        // Built-in fallback: emit the unsatisfied goals individually.
        let remaining = multigoal.unsatisfied_goals(state);
        self.vlog(2, || {
            format!(
                "multigoal '{}' falls back to {} individual goals",
                multigoal.name,
                remaining.len()
            )
        });
        self.apply_decomposition(
            tree,
            id,
            DEFAULT_MULTIGOAL_METHOD,
            remaining.into_iter().map(TodoItem::Goal).collect(),
            state,
        )
    }

    /// Record a successful method: an empty decomposition completes the
    /// node, otherwise children are created in emit order.
    fn apply_decomposition(
        &self,
        tree: &mut SolutionTree,
        id: NodeId,
        method_name: &str,
        subtodos: Vec<TodoItem>,
        state: &Arc<State>,
    ) -> Result<()> {
        self.vlog(3, || {
            let rendered: Vec<String> = subtodos.iter().map(TodoItem::describe).collect();
            format!("method '{}' emitted [{}]", method_name, rendered.join(", "))
        });
        if subtodos.is_empty() {
            let node = tree.node_mut(id)?;
            node.method_tried = Some(method_name.to_string());
            node.completed = true;
            node.expanded = true;
            return Ok(());
        }
        for todo in subtodos {
            tree.add_child(id, todo, state.clone())?;
        }
        let node = tree.node_mut(id)?;
        node.method_tried = Some(method_name.to_string());
        node.expanded = true;
        Ok(())
    }

    /// Mark a task node primitive, gating it on entity availability and
    /// recording whether it is durative.
    fn mark_primitive(
        &self,
        domain: &Domain,
        tree: &mut SolutionTree,
        id: NodeId,
        name: &str,
    ) -> Result<()> {
        if let (Some(action), Some(registry)) = (domain.action(name), domain.entity_registry()) {
            if !action.entity_requirements.is_empty() {
                // EntityUnavailable propagates as a method-level failure
                // and triggers backtracking at the parent.
                registry.match_entities(&action.entity_requirements)?;
            }
        }
        let durative = schedule::is_durative(domain, name);
        let node = tree.node_mut(id)?;
        node.is_primitive = true;
        node.is_durative = durative;
        node.expanded = true;
        Ok(())
    }

    /// Blacklist the method tried at the nearest ancestor that chose one,
    /// discard its subtree, and schedule it for re-expansion. With no such
    /// ancestor the original error surfaces.
    fn backtrack(&self, tree: &mut SolutionTree, failed: NodeId, err: Error) -> Result<()> {
        let mut cursor = failed;
        loop {
            let Some(parent) = tree.node(cursor)?.parent else {
                return Err(err);
            };
            if let Some(method) = tree.node(parent)?.method_tried.clone() {
                self.vlog(1, || {
                    format!(
                        "backtracking: blacklisting method '{}' at {} ({})",
                        method, parent, err
                    )
                });
                tree.remove_descendants(parent);
                let node = tree.node_mut(parent)?;
                node.blacklisted_methods.insert(method);
                node.method_tried = None;
                node.expanded = false;
                node.completed = false;
                return Ok(());
            }
            cursor = parent;
        }
    }

    /// Re-check every expanded goal node against the state its subtree's
    /// primitives would produce. An unmet goal is a method failure at that
    /// node. Returns whether anything was re-opened.
    fn verify_goals_pass(&self, domain: &Domain, tree: &mut SolutionTree) -> Result<bool> {
        let candidates: Vec<NodeId> = tree
            .node_ids()
            .iter()
            .copied()
            .filter(|id| {
                let Ok(node) = tree.node(*id) else { return false };
                node.expanded
                    && node.method_tried.is_some()
                    && !node.children.is_empty()
                    && matches!(node.task, NodeTask::Todo(TodoItem::Goal(_)))
            })
            .collect();

        for id in candidates {
            let node = tree.node(id)?;
            let NodeTask::Todo(TodoItem::Goal(goal)) = node.task.clone() else {
                continue;
            };
            let Some(method) = node.method_tried.clone() else {
                continue;
            };

            let achieved = match self.project_subtree(domain, tree, id) {
                Ok(projected) => goal.is_satisfied(&projected),
                Err(err) => {
                    debug!(%err, "projection failed during goal verification");
                    false
                }
            };
            if !achieved {
                info!(goal = %goal.predicate, method = %method, "verification rejected method");
                tree.remove_descendants(id);
                let node = tree.node_mut(id)?;
                node.blacklisted_methods.insert(method);
                node.method_tried = None;
                node.expanded = false;
                node.completed = false;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Project the state a node's primitive descendants would produce if
    /// executed in depth-first order.
    fn project_subtree(
        &self,
        domain: &Domain,
        tree: &SolutionTree,
        id: NodeId,
    ) -> Result<State> {
        let mut projected = (*tree.node(id)?.cached_state).clone();
        for primitive in tree.get_primitive_actions(id) {
            let node = tree.node(primitive)?;
            if let NodeTask::Todo(TodoItem::Task { name, args }) = &node.task {
                if let Some(action) = domain.action(name) {
                    projected = (action.effect)(&projected, args)?;
                } else if let Some(command) = domain.command(name) {
                    projected = (command.effect)(&projected, args)?;
                }
            }
        }
        Ok(projected)
    }

    fn vlog(&self, level: u8, message: impl Fn() -> String) {
        if self.opts.verbose >= level {
            info!("{}", message());
        }
    }
}
