//! Plan-tree data model and lifecycle state machine.
//!
//! A plan is a tree of candidate actions. Nodes store only their parent's id;
//! the tree's `nodes` index is the one authoritative table, which keeps the
//! structure serializable and free of ownership cycles — back-propagation and
//! path reconstruction walk parent ids, not pointers.
//!
//! The [`PlanLifecycle`] wraps a tree with the execution state machine:
//!
//! ```text
//! draft → approved → executing → {completed, failed, paused}
//! paused → executing
//! failed → draft            (replan)
//! completed                 (terminal)
//! ```
//!
//! Every accepted transition increments `version`; a rejected transition
//! leaves state, version, and `updated_at` untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::agentflow::error::AgentError;

/// Kind of a candidate action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Invoke one or more tools.
    ToolCall,
    /// Hand the step to a sub-agent.
    Delegate,
    /// Check the outcome of earlier steps.
    Verify,
    /// Break the step into smaller steps.
    Decompose,
}

impl ActionKind {
    /// Fixed cost used by plan scoring: cheap tool calls, expensive
    /// decomposition.
    pub fn cost(self) -> f64 {
        match self {
            ActionKind::ToolCall => 0.2,
            ActionKind::Verify => 0.3,
            ActionKind::Delegate => 0.6,
            ActionKind::Decompose => 0.8,
        }
    }

    /// Parse a lenient textual kind; unknown strings become `ToolCall`.
    pub fn parse(text: &str) -> ActionKind {
        match text.trim().to_lowercase().as_str() {
            "delegate" => ActionKind::Delegate,
            "verify" => ActionKind::Verify,
            "decompose" => ActionKind::Decompose,
            _ => ActionKind::ToolCall,
        }
    }
}

/// One candidate action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAction {
    /// What kind of step this is.
    pub kind: ActionKind,
    /// Short description used in summaries and logs.
    pub description: String,
    /// The prompt executed for this step.
    pub prompt: String,
    /// Target agent type for delegate actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Strategy label used by the optimizer-aware ordering.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
}

impl PlanAction {
    /// A plain action whose prompt doubles as its description.
    pub fn new(kind: ActionKind, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            kind,
            description: prompt.clone(),
            prompt,
            agent_type: None,
            strategy: String::new(),
        }
    }
}

/// Execution status of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One node of a plan tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    /// Stable node id.
    pub id: String,
    /// Parent id; `None` only for the root.
    pub parent_id: Option<String>,
    /// The candidate action.
    pub action: PlanAction,
    /// Execution status.
    pub status: NodeStatus,
    /// Last composite score assigned by a search.
    pub score: f64,
    /// Child ids, in insertion order.
    pub children: Vec<String>,
    /// Execution result text, once the node ran.
    pub result: Option<String>,
    /// MCTS visit count; monotonically non-decreasing.
    pub visits: u64,
    /// MCTS reward sum; monotonically non-decreasing.
    pub total_reward: f64,
    /// Ids that must be completed before this node is ready, in addition to
    /// the parent.
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

impl PlanNode {
    fn new(id: String, parent_id: Option<String>, action: PlanAction) -> Self {
        Self {
            id,
            parent_id,
            action,
            status: NodeStatus::Pending,
            score: 0.0,
            children: Vec::new(),
            result: None,
            visits: 0,
            total_reward: 0.0,
            prerequisites: Vec::new(),
        }
    }

    /// Average MCTS reward, 0.0 when unvisited.
    pub fn average_reward(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            self.total_reward / self.visits as f64
        }
    }
}

/// A tree of candidate actions with an id-indexed node table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTree {
    /// Id of the root node.
    pub root_id: String,
    /// The authoritative node table.
    pub nodes: HashMap<String, PlanNode>,
    /// Total nodes ever inserted.
    pub total_nodes: usize,
    /// Best path found by the last search, root first.
    pub best_path: Vec<String>,
}

impl PlanTree {
    /// A tree with a single root action.
    pub fn new(root_action: PlanAction) -> Self {
        let root_id = short_id();
        let root = PlanNode::new(root_id.clone(), None, root_action);
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        Self {
            root_id,
            nodes,
            total_nodes: 1,
            best_path: Vec::new(),
        }
    }

    /// Insert a child under `parent_id`, returning the new node's id.
    ///
    /// Fails when the parent does not resolve.
    pub fn add_child(&mut self, parent_id: &str, action: PlanAction) -> Result<String, AgentError> {
        if !self.nodes.contains_key(parent_id) {
            return Err(AgentError::planning(format!(
                "parent node '{}' not found",
                parent_id
            )));
        }
        let id = short_id();
        let node = PlanNode::new(id.clone(), Some(parent_id.to_string()), action);
        self.nodes.insert(id.clone(), node);
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            parent.children.push(id.clone());
        }
        self.total_nodes += 1;
        Ok(id)
    }

    /// Borrow a node by id.
    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    /// Mutably borrow a node by id.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut PlanNode> {
        self.nodes.get_mut(id)
    }

    /// Depth of a node (root is 0), following parent ids.
    pub fn depth_of(&self, id: &str) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(id);
        while let Some(node) = current {
            match &node.parent_id {
                Some(parent_id) => {
                    depth += 1;
                    current = self.nodes.get(parent_id);
                }
                None => break,
            }
        }
        depth
    }

    /// Ids of every ready node: pending, parent completed (or absent), and
    /// every prerequisite completed.
    pub fn ready_nodes(&self) -> Vec<String> {
        let mut ready: Vec<String> = self
            .nodes
            .values()
            .filter(|node| {
                if node.status != NodeStatus::Pending {
                    return false;
                }
                let parent_ok = match &node.parent_id {
                    Some(parent_id) => self
                        .nodes
                        .get(parent_id)
                        .map(|p| p.status == NodeStatus::Completed)
                        .unwrap_or(false),
                    None => true,
                };
                if !parent_ok {
                    return false;
                }
                node.prerequisites.iter().all(|pre| {
                    self.nodes
                        .get(pre)
                        .map(|p| p.status == NodeStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .map(|node| node.id.clone())
            .collect();
        ready.sort();
        ready
    }

    /// Record an execution outcome on a node.
    pub fn record_result(&mut self, id: &str, status: NodeStatus, result: Option<String>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.status = status;
            node.result = result;
        }
    }

    /// Back-propagate `reward` from `id` to the root with a decay per level.
    ///
    /// Visits and reward sums only ever grow.
    pub fn backpropagate(&mut self, id: &str, reward: f64, decay: f64) {
        let mut current = Some(id.to_string());
        let mut level_reward = reward;
        while let Some(node_id) = current {
            match self.nodes.get_mut(&node_id) {
                Some(node) => {
                    node.visits += 1;
                    node.total_reward += level_reward;
                    level_reward *= decay;
                    current = node.parent_id.clone();
                }
                None => break,
            }
        }
    }

    /// Whether any node is still pending or running.
    pub fn has_unfinished_nodes(&self) -> bool {
        self.nodes
            .values()
            .any(|n| matches!(n.status, NodeStatus::Pending | NodeStatus::Running))
    }
}

/// Execution phase of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanState {
    Draft,
    Approved,
    Executing,
    Completed,
    Failed,
    Paused,
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanState::Draft => "draft",
            PlanState::Approved => "approved",
            PlanState::Executing => "executing",
            PlanState::Completed => "completed",
            PlanState::Failed => "failed",
            PlanState::Paused => "paused",
        };
        write!(f, "{}", name)
    }
}

/// A plan tree wrapped with the execution state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLifecycle {
    /// Stable plan id.
    pub plan_id: String,
    /// Current phase.
    pub state: PlanState,
    /// The plan tree.
    pub tree: PlanTree,
    /// Strictly increasing on every accepted transition.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last accepted transition.
    pub updated_at: DateTime<Utc>,
    /// Number of replans performed.
    pub replan_count: u32,
    /// Why the last replan happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replan_reason: Option<String>,
}

impl PlanLifecycle {
    /// A draft lifecycle around `tree`.
    pub fn new(tree: PlanTree) -> Self {
        let now = Utc::now();
        Self {
            plan_id: short_id(),
            state: PlanState::Draft,
            tree,
            version: 1,
            created_at: now,
            updated_at: now,
            replan_count: 0,
            replan_reason: None,
        }
    }

    /// Whether `from → to` is an allowed transition.
    pub fn can_transition(from: PlanState, to: PlanState) -> bool {
        matches!(
            (from, to),
            (PlanState::Draft, PlanState::Approved)
                | (PlanState::Approved, PlanState::Executing)
                | (PlanState::Executing, PlanState::Completed)
                | (PlanState::Executing, PlanState::Failed)
                | (PlanState::Executing, PlanState::Paused)
                | (PlanState::Paused, PlanState::Executing)
                | (PlanState::Failed, PlanState::Draft)
        )
    }

    /// Attempt a transition.
    ///
    /// An accepted transition increments `version` and touches `updated_at`;
    /// a rejected one leaves the lifecycle untouched and returns a
    /// lifecycle error.
    pub fn transition(&mut self, to: PlanState) -> Result<(), AgentError> {
        if !Self::can_transition(self.state, to) {
            return Err(AgentError::lifecycle(format!(
                "invalid plan transition: {} -> {}",
                self.state, to
            )));
        }
        log::debug!("plan {}: {} -> {}", self.plan_id, self.state, to);
        self.state = to;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Begin a replan: transition failed → draft, swap in the regenerated
    /// tree, and record the reason.
    pub fn replan(&mut self, new_tree: PlanTree, reason: impl Into<String>) -> Result<(), AgentError> {
        self.transition(PlanState::Draft)?;
        self.tree = new_tree;
        self.replan_count += 1;
        self.replan_reason = Some(reason.into());
        Ok(())
    }

    /// Persist this lifecycle as one JSON document (full-file rewrite).
    pub fn save(&self, path: &std::path::Path) -> Result<(), AgentError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AgentError::other(format!("serialize plan lifecycle: {}", e)))?;
        std::fs::write(path, json)
            .map_err(|e| AgentError::other(format!("write plan lifecycle: {}", e)))
    }

    /// Load a lifecycle previously written by [`PlanLifecycle::save`].
    pub fn load(path: &std::path::Path) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AgentError::other(format!("read plan lifecycle: {}", e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| AgentError::other(format!("parse plan lifecycle: {}", e)))
    }

    /// One-line-per-step summary used by approval callbacks.
    pub fn summary(&self) -> String {
        let mut out = format!("Plan {} ({} nodes):\n", self.plan_id, self.tree.total_nodes);
        let mut stack = vec![(self.tree.root_id.clone(), 0usize)];
        while let Some((id, depth)) = stack.pop() {
            if let Some(node) = self.tree.node(&id) {
                out.push_str(&format!(
                    "{}- [{:?}] {}\n",
                    "  ".repeat(depth),
                    node.action.kind,
                    node.action.description
                ));
                for child in node.children.iter().rev() {
                    stack.push((child.clone(), depth + 1));
                }
            }
        }
        out
    }
}

/// Short random hex id used for plan and node ids.
pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
