//! Per-action timing specifications.
//!
//! A [`TemporalSpecifications`] table records each action's duration and
//! any temporal constraints (deadlines, earliest starts, latest ends,
//! resource-availability windows), and expands execution patterns into the
//! precedence tags the STN composer translates to bounds.

use crate::duration::Duration;
use common::{Error, Result, Timestamp};
use serde::{Deserialize, Serialize};
use state::State;
use std::collections::{BTreeMap, HashMap};

/// A temporal constraint attached to an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TemporalConstraint {
    /// The action must end by this instant
    Deadline { at: Timestamp },
    /// The action must not start before this instant
    EarliestStart { at: Timestamp },
    /// The action must not end after this instant
    LatestEnd { at: Timestamp },
    /// A required resource is only available inside the window
    ResourceAvailability {
        resource: String,
        from: Timestamp,
        until: Timestamp,
    },
}

/// How a group of actions is laid out in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPatternKind {
    Sequential,
    Parallel,
    Overlapping,
    Pipeline,
}

/// Descriptive precedence tag between two actions. The STN composer
/// translates these to temporal bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PrecedenceConstraint {
    /// `first` ends before `second` starts
    Before { first: String, second: String },
    /// Both actions start at the same instant
    SimultaneousStart { first: String, second: String },
    /// `first` starts no later than `second`; overlap is permitted
    OverlapAllowed { first: String, second: String },
    /// Pipeline stage ordering; overlap is expected
    PipelineStage { first: String, second: String },
}

/// Duration table plus temporal constraints, keyed by action name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalSpecifications {
    durations: HashMap<String, Duration>,
    constraints: HashMap<String, Vec<TemporalConstraint>>,
}

impl TemporalSpecifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action's duration after validating it.
    pub fn add_action_duration(
        &mut self,
        action: impl Into<String>,
        duration: Duration,
    ) -> Result<()> {
        duration.validate()?;
        self.durations.insert(action.into(), duration);
        Ok(())
    }

    /// Attach a temporal constraint to an action.
    pub fn add_constraint(
        &mut self,
        action: impl Into<String>,
        constraint: TemporalConstraint,
    ) {
        self.constraints
            .entry(action.into())
            .or_default()
            .push(constraint);
    }

    pub fn get_action_duration(&self, action: &str) -> Option<&Duration> {
        self.durations.get(action)
    }

    pub fn get_action_constraints(&self, action: &str) -> &[TemporalConstraint] {
        self.constraints
            .get(action)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty() && self.constraints.is_empty()
    }

    /// Resolve an action's duration to seconds given the current state and
    /// resource assignment. Unregistered actions are instant.
    pub fn calculate_duration(
        &self,
        action: &str,
        state: &State,
        resources: &BTreeMap<String, String>,
    ) -> f64 {
        self.durations
            .get(action)
            .map(|d| d.calculate(state, resources))
            .unwrap_or(0.0)
    }

    /// Expand an execution pattern over an ordered action list into
    /// precedence tags.
    pub fn create_execution_pattern(
        &self,
        kind: ExecutionPatternKind,
        actions: &[String],
    ) -> Result<Vec<PrecedenceConstraint>> {
        if actions.is_empty() {
            return Err(Error::InvalidInput(
                "execution pattern requires at least one action".to_string(),
            ));
        }

        let mut constraints = Vec::new();
        match kind {
            ExecutionPatternKind::Sequential => {
                for pair in actions.windows(2) {
                    constraints.push(PrecedenceConstraint::Before {
                        first: pair[0].clone(),
                        second: pair[1].clone(),
                    });
                }
            }
            ExecutionPatternKind::Parallel => {
                for other in &actions[1..] {
                    constraints.push(PrecedenceConstraint::SimultaneousStart {
                        first: actions[0].clone(),
                        second: other.clone(),
                    });
                }
            }
            ExecutionPatternKind::Overlapping => {
                for pair in actions.windows(2) {
                    constraints.push(PrecedenceConstraint::OverlapAllowed {
                        first: pair[0].clone(),
                        second: pair[1].clone(),
                    });
                }
            }
            ExecutionPatternKind::Pipeline => {
                for pair in actions.windows(2) {
                    constraints.push(PrecedenceConstraint::PipelineStage {
                        first: pair[0].clone(),
                        second: pair[1].clone(),
                    });
                }
            }
        }
        Ok(constraints)
    }
}
