//! Search over plan trees: beam search, MCTS, and A*.
//!
//! All three searches share one scoring function ([`score_node`]):
//!
//! - `success` — the node's average MCTS reward when visited, else the
//!   optimizer's historical success rate for its strategy, else 0.5;
//! - `cost` — fixed per action kind (tool_call 0.2, verify 0.3, delegate
//!   0.6, decompose 0.8);
//! - `progress` — 1.0 when completed, 0.0 when failed, else
//!   `depth / max_depth`;
//! - `composite = wₛ·success + w_c·(1−cost) + wₚ·progress`, multiplied by
//!   `0.95^depth`.
//!
//! Tree growth during a search goes through a [`NodeExpander`], which asks
//! the provider for follow-up actions; the searches themselves never talk to
//! a provider directly.

use crate::agentflow::error::AgentError;
use crate::agentflow::optimizer::StrategyOptimizer;
use crate::agentflow::plan::{NodeStatus, PlanAction, PlanNode, PlanTree};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Which search drives `best_path` selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchAlgorithm {
    /// Level-by-level beam search.
    Beam,
    /// Monte-Carlo tree search with UCB1 selection.
    Mcts,
    /// A* over `g = depth + failure penalty`, `h = 1 − success`.
    AStar,
}

/// Weights of the composite score.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    /// Weight of the success component.
    pub success: f64,
    /// Weight of the inverted-cost component.
    pub cost: f64,
    /// Weight of the progress component.
    pub progress: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            success: 0.4,
            cost: 0.3,
            progress: 0.3,
        }
    }
}

/// Search tuning knobs.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Beam width, also the cap on root alternatives during plan building.
    pub beam_width: usize,
    /// Maximum tree depth explored.
    pub max_depth: usize,
    /// MCTS iteration budget.
    pub iterations: usize,
    /// Hard cap on tree size during expansion.
    pub max_tree_nodes: usize,
    /// UCB1 exploration constant.
    pub exploration: f64,
    /// Composite score weights.
    pub weights: ScoreWeights,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            beam_width: 3,
            max_depth: 4,
            iterations: 50,
            max_tree_nodes: 64,
            exploration: std::f64::consts::SQRT_2,
            weights: ScoreWeights::default(),
        }
    }
}

/// Per-level depth penalty applied to composite scores.
const DEPTH_PENALTY: f64 = 0.95;

/// Reward decay per level during MCTS backpropagation.
const MCTS_DECAY: f64 = 0.9;

/// Failure penalty added to `g` in A*.
const ASTAR_FAILURE_PENALTY: f64 = 2.0;

/// Generates follow-up actions for a node during search expansion.
#[async_trait]
pub trait NodeExpander: Send + Sync {
    /// Candidate follow-up actions after `node`, toward `goal`.
    async fn expand(&self, goal: &str, node: &PlanNode) -> Result<Vec<PlanAction>, AgentError>;
}

/// Success component of the composite score.
pub fn success_prob(
    node: &PlanNode,
    optimizer: Option<&Arc<StrategyOptimizer>>,
) -> f64 {
    if node.visits > 0 {
        return node.average_reward();
    }
    let strategy = if node.action.strategy.is_empty() {
        None
    } else {
        Some(node.action.strategy.as_str())
    };
    strategy
        .and_then(|s| optimizer.and_then(|opt| opt.success_rate(s)))
        .unwrap_or(0.5)
}

/// The shared composite score.
pub fn score_node(
    tree: &PlanTree,
    node_id: &str,
    optimizer: Option<&Arc<StrategyOptimizer>>,
    config: &SearchConfig,
) -> f64 {
    let node = match tree.node(node_id) {
        Some(node) => node,
        None => return 0.0,
    };
    let depth = tree.depth_of(node_id);

    let success = success_prob(node, optimizer);
    let cost = node.action.kind.cost();
    let progress = match node.status {
        NodeStatus::Completed => 1.0,
        NodeStatus::Failed => 0.0,
        _ => depth as f64 / config.max_depth.max(1) as f64,
    };

    let w = &config.weights;
    let composite = w.success * success + w.cost * (1.0 - cost) + w.progress * progress;
    composite * DEPTH_PENALTY.powi(depth as i32)
}

/// Level-by-level beam search.
///
/// Starting from the root's children (or the root itself), each level scores
/// the beam, keeps the top `beam_width`, expands kept nodes that have no
/// children, and descends into the union of their children. The top-scoring
/// node of each level is appended to the best path.
pub async fn beam_search(
    tree: &mut PlanTree,
    goal: &str,
    expander: &dyn NodeExpander,
    optimizer: Option<&Arc<StrategyOptimizer>>,
    config: &SearchConfig,
) -> Result<Vec<String>, AgentError> {
    let root_id = tree.root_id.clone();
    let mut best_path = vec![root_id.clone()];

    let mut beam: Vec<String> = {
        let root = tree
            .node(&root_id)
            .ok_or_else(|| AgentError::planning("plan tree has no root"))?;
        if root.children.is_empty() {
            vec![root_id.clone()]
        } else {
            root.children.clone()
        }
    };

    for _level in 0..config.max_depth {
        if beam.is_empty() {
            break;
        }

        let mut scored: Vec<(String, f64)> = beam
            .iter()
            .map(|id| (id.clone(), score_node(tree, id, optimizer, config)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(config.beam_width);

        if let Some((best, score)) = scored.first() {
            if *best != root_id {
                best_path.push(best.clone());
            }
            if let Some(node) = tree.node_mut(best) {
                node.score = *score;
            }
        }

        let mut next_beam = Vec::new();
        for (id, score) in &scored {
            if let Some(node) = tree.node_mut(id) {
                node.score = *score;
            }
            let needs_expansion = tree
                .node(id)
                .map(|n| n.children.is_empty())
                .unwrap_or(false);
            if needs_expansion && tree.total_nodes < config.max_tree_nodes {
                let snapshot = tree.node(id).cloned();
                if let Some(node) = snapshot {
                    let actions = expander.expand(goal, &node).await?;
                    for action in actions {
                        if tree.total_nodes >= config.max_tree_nodes {
                            break;
                        }
                        tree.add_child(id, action)?;
                    }
                }
            }
            if let Some(node) = tree.node(id) {
                next_beam.extend(node.children.clone());
            }
        }
        beam = next_beam;
    }

    tree.best_path = best_path.clone();
    Ok(best_path)
}

/// UCB1 value of a child under its parent.
fn ucb1(child: &PlanNode, parent_visits: u64, exploration: f64) -> f64 {
    if child.visits == 0 {
        return f64::INFINITY;
    }
    let exploit = child.total_reward / child.visits as f64;
    let explore = exploration * ((parent_visits.max(1) as f64).ln() / child.visits as f64).sqrt();
    exploit + explore
}

/// Monte-Carlo tree search.
///
/// Each of up to `iterations` rounds selects a leaf from the root via UCB1
/// (unvisited children first), expands it when it is pending with no
/// children, uses its composite score as the simulated reward, and
/// back-propagates with a 0.9 decay per level. The best path is the
/// max-average-reward descent from the root.
pub async fn mcts_search(
    tree: &mut PlanTree,
    goal: &str,
    expander: &dyn NodeExpander,
    optimizer: Option<&Arc<StrategyOptimizer>>,
    config: &SearchConfig,
) -> Result<Vec<String>, AgentError> {
    for _round in 0..config.iterations {
        // Select.
        let mut current = tree.root_id.clone();
        loop {
            let node = match tree.node(&current) {
                Some(node) => node,
                None => break,
            };
            if node.children.is_empty() {
                break;
            }
            let parent_visits = node.visits;
            let next = node
                .children
                .iter()
                .filter_map(|id| tree.node(id))
                .max_by(|a, b| {
                    ucb1(a, parent_visits, config.exploration)
                        .partial_cmp(&ucb1(b, parent_visits, config.exploration))
                        .unwrap_or(Ordering::Equal)
                })
                .map(|n| n.id.clone());
            match next {
                Some(id) => current = id,
                None => break,
            }
        }

        // Expand.
        let should_expand = tree
            .node(&current)
            .map(|n| n.status == NodeStatus::Pending && n.children.is_empty())
            .unwrap_or(false);
        if should_expand && tree.total_nodes < config.max_tree_nodes {
            let snapshot = tree.node(&current).cloned();
            if let Some(node) = snapshot {
                let actions = expander.expand(goal, &node).await?;
                for action in actions {
                    if tree.total_nodes >= config.max_tree_nodes {
                        break;
                    }
                    tree.add_child(&current, action)?;
                }
            }
            // Simulate from a fresh child when one was added.
            if let Some(first_child) = tree
                .node(&current)
                .and_then(|n| n.children.first().cloned())
            {
                current = first_child;
            }
        }

        // Simulate: the composite score stands in for a rollout.
        let reward = score_node(tree, &current, optimizer, config);

        // Backpropagate.
        tree.backpropagate(&current, reward, MCTS_DECAY);
    }

    // Best path: descend by max average reward.
    let mut best_path = vec![tree.root_id.clone()];
    let mut current = tree.root_id.clone();
    loop {
        let next = tree.node(&current).and_then(|node| {
            node.children
                .iter()
                .filter_map(|id| tree.node(id))
                .filter(|child| child.visits > 0)
                .max_by(|a, b| {
                    a.average_reward()
                        .partial_cmp(&b.average_reward())
                        .unwrap_or(Ordering::Equal)
                })
                .map(|child| child.id.clone())
        });
        match next {
            Some(id) => {
                best_path.push(id.clone());
                current = id;
            }
            None => break,
        }
    }

    tree.best_path = best_path.clone();
    Ok(best_path)
}

/// Heap entry ordered by lowest `f`.
struct AStarEntry {
    f: f64,
    id: String,
}

impl PartialEq for AStarEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.id == other.id
    }
}
impl Eq for AStarEntry {}
impl PartialOrd for AStarEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for AStarEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest f on top.
        other
            .f
            .partial_cmp(&self.f)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A* search.
///
/// `g(n) = depth + 2·(1 if failed)`, `h(n) = 1 − success_prob(n)`,
/// expanding lazily through the [`NodeExpander`] and respecting the node and
/// depth budgets. The path is reconstructed by walking parent links from the
/// best terminal node reached.
pub async fn astar_search(
    tree: &mut PlanTree,
    goal: &str,
    expander: &dyn NodeExpander,
    optimizer: Option<&Arc<StrategyOptimizer>>,
    config: &SearchConfig,
) -> Result<Vec<String>, AgentError> {
    let mut open = BinaryHeap::new();
    let root_id = tree.root_id.clone();
    open.push(AStarEntry {
        f: 0.0,
        id: root_id.clone(),
    });

    let mut best_terminal = root_id.clone();
    let mut best_terminal_f = f64::INFINITY;

    while let Some(AStarEntry { id, .. }) = open.pop() {
        let depth = tree.depth_of(&id);

        // Lazily generate children for unexpanded, non-terminal nodes.
        let unexpanded = tree
            .node(&id)
            .map(|n| n.children.is_empty() && n.status == NodeStatus::Pending)
            .unwrap_or(false);
        if unexpanded && depth < config.max_depth && tree.total_nodes < config.max_tree_nodes {
            let snapshot = tree.node(&id).cloned();
            if let Some(node) = snapshot {
                let actions = expander.expand(goal, &node).await?;
                for action in actions {
                    if tree.total_nodes >= config.max_tree_nodes {
                        break;
                    }
                    tree.add_child(&id, action)?;
                }
            }
        }

        let node = match tree.node(&id) {
            Some(node) => node,
            None => continue,
        };

        let failed_penalty = if node.status == NodeStatus::Failed {
            ASTAR_FAILURE_PENALTY
        } else {
            0.0
        };
        let g = depth as f64 + failed_penalty;
        let h = 1.0 - success_prob(node, optimizer);
        let f = g + h;

        if node.children.is_empty() {
            if f < best_terminal_f {
                best_terminal_f = f;
                best_terminal = id.clone();
            }
            continue;
        }

        for child_id in node.children.clone() {
            if let Some(child) = tree.node(&child_id) {
                let child_depth = depth + 1;
                let child_penalty = if child.status == NodeStatus::Failed {
                    ASTAR_FAILURE_PENALTY
                } else {
                    0.0
                };
                let child_g = child_depth as f64 + child_penalty;
                let child_h = 1.0 - success_prob(child, optimizer);
                open.push(AStarEntry {
                    f: child_g + child_h,
                    id: child_id,
                });
            }
        }
    }

    // Reconstruct by parent links.
    let mut path = Vec::new();
    let mut current = Some(best_terminal);
    while let Some(id) = current {
        path.push(id.clone());
        current = tree.node(&id).and_then(|n| n.parent_id.clone());
    }
    path.reverse();

    tree.best_path = path.clone();
    Ok(path)
}

/// Dispatch to the configured algorithm.
pub async fn run_search(
    algorithm: SearchAlgorithm,
    tree: &mut PlanTree,
    goal: &str,
    expander: &dyn NodeExpander,
    optimizer: Option<&Arc<StrategyOptimizer>>,
    config: &SearchConfig,
) -> Result<Vec<String>, AgentError> {
    match algorithm {
        SearchAlgorithm::Beam => beam_search(tree, goal, expander, optimizer, config).await,
        SearchAlgorithm::Mcts => mcts_search(tree, goal, expander, optimizer, config).await,
        SearchAlgorithm::AStar => astar_search(tree, goal, expander, optimizer, config).await,
    }
}
