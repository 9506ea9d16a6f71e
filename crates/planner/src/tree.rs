//! Solution tree: the refinement history of a plan.
//!
//! Nodes live in an insertion-ordered arena keyed by monotonic integer
//! ids; no pointers are stored, which keeps the tree serializable and
//! cheap to move across threads. Child lists preserve method-emit order,
//! and the natural scan order of the arena is node-creation order.

use common::{Error, Result};
use domain::{Goal, TodoItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use state::State;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Monotonic node identifier, unique within one tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What a node stands for: the root todo list, or a single todo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeTask {
    Root(Vec<TodoItem>),
    Todo(TodoItem),
}

fn initial_state() -> Arc<State> {
    Arc::new(State::new())
}

/// A node in the solution tree.
///
/// Cached states are planning-time references only and are not part of
/// the serialized form; trees serialize by id, task variant, parent id,
/// ordered child ids, flags and tried-method name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionNode {
    pub id: NodeId,
    pub task: NodeTask,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    #[serde(skip, default = "initial_state")]
    pub cached_state: Arc<State>,
    pub visited: bool,
    pub expanded: bool,
    pub completed: bool,
    pub method_tried: Option<String>,
    pub blacklisted_methods: BTreeSet<String>,
    pub is_primitive: bool,
    pub is_durative: bool,
}

impl SolutionNode {
    fn new(id: NodeId, task: NodeTask, parent: Option<NodeId>, state: Arc<State>) -> Self {
        Self {
            id,
            task,
            parent,
            children: Vec::new(),
            cached_state: state,
            visited: false,
            expanded: false,
            completed: false,
            method_tried: None,
            blacklisted_methods: BTreeSet::new(),
            is_primitive: false,
            is_durative: false,
        }
    }
}

/// Serialized form of a tree: the node list in creation order.
#[derive(Serialize, Deserialize)]
struct TreeSnapshot {
    root: NodeId,
    blacklisted_commands: BTreeSet<String>,
    nodes: Vec<SolutionNode>,
}

/// Aggregate statistics over a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub total_nodes: usize,
    pub expanded_nodes: usize,
    pub primitive_actions: usize,
    pub max_depth: usize,
}

/// Rooted directed tree of solution nodes.
#[derive(Debug, Clone)]
pub struct SolutionTree {
    nodes: HashMap<NodeId, SolutionNode>,
    order: Vec<NodeId>,
    root: NodeId,
    next_id: u64,
    blacklisted_commands: BTreeSet<String>,
}

impl SolutionTree {
    /// Root with task `Root(todos)`, not yet expanded, caching the
    /// initial state.
    pub fn create_initial(todos: Vec<TodoItem>, state: &State) -> Self {
        let root = NodeId(0);
        let node = SolutionNode::new(root, NodeTask::Root(todos), None, Arc::new(state.clone()));
        Self {
            nodes: HashMap::from([(root, node)]),
            order: vec![root],
            root,
            next_id: 1,
            blacklisted_commands: BTreeSet::new(),
        }
    }

    /// Build a tree whose root children replay a precomputed action list,
    /// followed by the goals it was meant to achieve.
    pub fn create_from_actions(
        actions: &[(String, Vec<Value>)],
        goals: &[Goal],
        state: &State,
    ) -> Self {
        let mut todos: Vec<TodoItem> = actions
            .iter()
            .map(|(name, args)| TodoItem::task(name.clone(), args.clone()))
            .collect();
        todos.extend(goals.iter().cloned().map(TodoItem::Goal));

        let mut tree = Self::create_initial(todos.clone(), state);
        let shared = tree.node(tree.root).expect("root exists").cached_state.clone();
        for todo in todos {
            let is_action = matches!(todo, TodoItem::Task { .. });
            let id = tree
                .add_child(tree.root, todo, shared.clone())
                .expect("root exists");
            if is_action {
                let node = tree.nodes.get_mut(&id).expect("just created");
                node.is_primitive = true;
                node.expanded = true;
            }
        }
        let root = tree.nodes.get_mut(&tree.root).expect("root exists");
        root.expanded = true;
        root.visited = true;
        tree
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Node ids in creation order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn node(&self, id: NodeId) -> Result<&SolutionNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("solution node {}", id)))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut SolutionNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("solution node {}", id)))
    }

    fn generate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Append a child to a parent, preserving emit order.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        todo: TodoItem,
        state: Arc<State>,
    ) -> Result<NodeId> {
        if !self.nodes.contains_key(&parent) {
            return Err(Error::NotFound(format!("solution node {}", parent)));
        }
        let id = self.generate_node_id();
        let node = SolutionNode::new(id, NodeTask::Todo(todo), Some(parent), state);
        self.nodes.insert(id, node);
        self.order.push(id);
        self.nodes
            .get_mut(&parent)
            .expect("checked above")
            .children
            .push(id);
        Ok(id)
    }

    /// First unexpanded node in creation order.
    pub fn next_unexpanded(&self) -> Option<NodeId> {
        self.order
            .iter()
            .copied()
            .find(|id| !self.nodes[id].expanded)
    }

    /// A tree is complete when the root is expanded and every non-root
    /// node is expanded and either primitive, completed, or has children.
    pub fn solution_complete(&self) -> bool {
        let Some(root) = self.nodes.get(&self.root) else {
            return false;
        };
        root.expanded
            && self
                .order
                .iter()
                .filter(|id| **id != self.root)
                .all(|id| {
                    let node = &self.nodes[id];
                    node.expanded
                        && (node.is_primitive || node.completed || !node.children.is_empty())
                })
    }

    /// Broadcast a new state reference to every node.
    pub fn update_cached_states(&mut self, state: &State) {
        let shared = Arc::new(state.clone());
        for node in self.nodes.values_mut() {
            node.cached_state = shared.clone();
        }
    }

    /// Preorder descendants of a node (the node itself excluded).
    pub fn get_all_descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(&id)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            result.push(current);
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        result
    }

    /// Every goal appearing in the tree, in creation order.
    pub fn get_goals_from_tree(&self) -> Vec<Goal> {
        self.order
            .iter()
            .filter_map(|id| match &self.nodes[id].task {
                NodeTask::Todo(TodoItem::Goal(goal)) => Some(goal.clone()),
                _ => None,
            })
            .collect()
    }

    /// Depth-first extraction of primitive leaves in child order.
    pub fn get_primitive_actions(&self, from: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        self.collect_primitives(from, &mut result);
        result
    }

    /// Ordered primitive todos: the executable rendering of a tree.
    pub fn primitive_todos(&self) -> Vec<TodoItem> {
        self.get_primitive_actions(self.root)
            .into_iter()
            .filter_map(|id| match &self.nodes[&id].task {
                NodeTask::Todo(todo) => Some(todo.clone()),
                NodeTask::Root(_) => None,
            })
            .collect()
    }

    fn collect_primitives(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if node.is_primitive {
            out.push(id);
            return;
        }
        for child in &node.children {
            self.collect_primitives(*child, out);
        }
    }

    /// Discard a node's entire subtree below it (used when a tried method
    /// is abandoned). The node itself stays.
    pub fn remove_descendants(&mut self, id: NodeId) {
        let descendants = self.get_all_descendants(id);
        for descendant in &descendants {
            self.nodes.remove(descendant);
        }
        let removed: BTreeSet<NodeId> = descendants.into_iter().collect();
        self.order.retain(|node_id| !removed.contains(node_id));
        if let Some(node) = self.nodes.get_mut(&id) {
            node.children.clear();
        }
    }

    /// Record a command that failed at execution time.
    pub fn blacklist_command(&mut self, name: impl Into<String>) {
        self.blacklisted_commands.insert(name.into());
    }

    pub fn blacklisted_commands(&self) -> &BTreeSet<String> {
        &self.blacklisted_commands
    }

    /// Depth of a node (root = 1).
    pub fn depth_of(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            depth += 1;
            cursor = self.nodes.get(&current).and_then(|n| n.parent);
        }
        depth
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            total_nodes: self.order.len(),
            expanded_nodes: self
                .order
                .iter()
                .filter(|id| self.nodes[id].expanded)
                .count(),
            primitive_actions: self
                .order
                .iter()
                .filter(|id| self.nodes[id].is_primitive)
                .count(),
            max_depth: self
                .order
                .iter()
                .map(|id| self.depth_of(*id))
                .max()
                .unwrap_or(0),
        }
    }
}

impl Serialize for SolutionTree {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let snapshot = TreeSnapshot {
            root: self.root,
            blacklisted_commands: self.blacklisted_commands.clone(),
            nodes: self
                .order
                .iter()
                .map(|id| self.nodes[id].clone())
                .collect(),
        };
        snapshot.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SolutionTree {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let snapshot = TreeSnapshot::deserialize(deserializer)?;
        let mut nodes = HashMap::with_capacity(snapshot.nodes.len());
        let mut order = Vec::with_capacity(snapshot.nodes.len());
        let mut next_id = 0;
        for node in snapshot.nodes {
            next_id = next_id.max(node.id.0 + 1);
            order.push(node.id);
            nodes.insert(node.id, node);
        }
        Ok(Self {
            nodes,
            order,
            root: snapshot.root,
            next_id,
            blacklisted_commands: snapshot.blacklisted_commands,
        })
    }
}
