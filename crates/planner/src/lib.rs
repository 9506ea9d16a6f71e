//! HTN planning and execution.
//!
//! This crate ties the solution tree, the refinement engine and the
//! execution driver together behind the three-call planning API:
//! [`plan`] refines todos into a solution tree without touching state,
//! [`run_lazy`] plans and then executes, and [`run_lazy_tree`] executes a
//! precomputed tree.

pub mod engine;
pub mod executor;
pub mod schedule;
pub mod tree;

pub use engine::{HtnPlanner, PlanMetadata, PlanOptions, PlanOutcome};
pub use executor::{ExecutionDriver, ExecutionOutcome};
pub use tree::{NodeId, NodeTask, SolutionNode, SolutionTree, TreeStats};

use common::Result;
use domain::{Domain, TodoItem};
use state::State;

/// Plan a todo list. Planning only; no state mutation.
pub fn plan(
    domain: &Domain,
    state: &State,
    todos: Vec<TodoItem>,
    opts: PlanOptions,
) -> Result<PlanOutcome> {
    HtnPlanner::new(opts).plan(domain, state, todos)
}

/// Plan, then execute the resulting tree against the state.
pub fn run_lazy(
    domain: &Domain,
    state: &State,
    todos: Vec<TodoItem>,
    opts: PlanOptions,
) -> Result<ExecutionOutcome> {
    let outcome = HtnPlanner::new(opts.clone()).plan(domain, state, todos)?;
    ExecutionDriver::new(opts).execute(domain, outcome.tree, state)
}

/// Execute a precomputed solution tree.
pub fn run_lazy_tree(
    domain: &Domain,
    state: &State,
    tree: SolutionTree,
    opts: PlanOptions,
) -> Result<ExecutionOutcome> {
    opts.validate()?;
    ExecutionDriver::new(opts).execute(domain, tree, state)
}
