//! Work items: tasks, goals and multigoals.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use state::State;

/// A single-predicate goal `predicate(subject) = value`.
///
/// Serializes as a `(predicate, subject, value)` 3-tuple on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, String, Value)", into = "(String, String, Value)")]
pub struct Goal {
    pub predicate: String,
    pub subject: String,
    pub value: Value,
}

impl Goal {
    pub fn new(predicate: impl Into<String>, subject: impl Into<String>, value: Value) -> Self {
        Self {
            predicate: predicate.into(),
            subject: subject.into(),
            value,
        }
    }

    /// True when the state already carries this goal's fact.
    pub fn is_satisfied(&self, state: &State) -> bool {
        state.matches(&self.predicate, &self.subject, &self.value)
    }
}

impl From<(String, String, Value)> for Goal {
    fn from((predicate, subject, value): (String, String, Value)) -> Self {
        Self {
            predicate,
            subject,
            value,
        }
    }
}

impl From<Goal> for (String, String, Value) {
    fn from(goal: Goal) -> Self {
        (goal.predicate, goal.subject, goal.value)
    }
}

/// A conjunction of goals processed as a unit so optimizers can reorder
/// or jointly solve them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multigoal {
    pub name: String,
    pub goals: Vec<Goal>,
}

impl Multigoal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            goals: Vec::new(),
        }
    }

    pub fn set_goal(
        &mut self,
        predicate: impl Into<String>,
        subject: impl Into<String>,
        value: Value,
    ) {
        self.goals.push(Goal::new(predicate, subject, value));
    }

    pub fn with_goal(
        mut self,
        predicate: impl Into<String>,
        subject: impl Into<String>,
        value: Value,
    ) -> Self {
        self.set_goal(predicate, subject, value);
        self
    }

    pub fn is_satisfied(&self, state: &State) -> bool {
        self.goals.iter().all(|g| g.is_satisfied(state))
    }

    /// Goals not yet holding in the state, in declared order.
    pub fn unsatisfied_goals(&self, state: &State) -> Vec<Goal> {
        self.goals
            .iter()
            .filter(|g| !g.is_satisfied(state))
            .cloned()
            .collect()
    }
}

/// A unit of remaining work for the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoItem {
    /// A named task with arguments, decomposed by task methods
    Task { name: String, args: Vec<Value> },
    /// A single-predicate goal, solved by unigoal methods
    Goal(Goal),
    /// A goal conjunction, solved by multigoal methods
    Multigoal(Multigoal),
}

impl TodoItem {
    pub fn task(name: impl Into<String>, args: Vec<Value>) -> Self {
        TodoItem::Task {
            name: name.into(),
            args,
        }
    }

    pub fn goal(
        predicate: impl Into<String>,
        subject: impl Into<String>,
        value: Value,
    ) -> Self {
        TodoItem::Goal(Goal::new(predicate, subject, value))
    }

    pub fn multigoal(multigoal: Multigoal) -> Self {
        TodoItem::Multigoal(multigoal)
    }

    /// Compact rendering for trace output, e.g. `(cook_meal "pasta")`.
    pub fn describe(&self) -> String {
        match self {
            TodoItem::Task { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                if rendered.is_empty() {
                    format!("({})", name)
                } else {
                    format!("({} {})", name, rendered.join(" "))
                }
            }
            TodoItem::Goal(goal) => {
                format!("({} {} {})", goal.predicate, goal.subject, goal.value)
            }
            TodoItem::Multigoal(mg) => format!("(multigoal {} |{}|)", mg.name, mg.goals.len()),
        }
    }
}
