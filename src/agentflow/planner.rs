//! Plan construction and execution.
//!
//! The [`Planner`] asks the provider for a JSON array of candidate actions,
//! builds a [`PlanTree`] (one root action plus up to `beam_width − 1`
//! alternatives as root children), runs the configured search to pick a best
//! path, and then drives the [`PlanLifecycle`] through execution:
//!
//! ```text
//! build → draft → approved → executing → completed
//!                     ▲                      │ node failure
//!                     └── replan (≤ 3) ──────┘
//! ```
//!
//! When a strategy optimizer is attached, root children are reordered so the
//! historically best strategy for the goal's task type is tried first. Task
//! types are classified by keyword: bugfix, refactoring, implementation,
//! testing, exploration, or general.

use crate::agentflow::content::Content;
use crate::agentflow::error::AgentError;
use crate::agentflow::executor::ToolExecutor;
use crate::agentflow::optimizer::StrategyOptimizer;
use crate::agentflow::plan::{
    ActionKind, NodeStatus, PlanAction, PlanLifecycle, PlanNode, PlanState, PlanTree,
};
use crate::agentflow::provider::Provider;
use crate::agentflow::reflector::Reflector;
use crate::agentflow::runner::Runner;
use crate::agentflow::search::{run_search, NodeExpander, SearchAlgorithm, SearchConfig};
use crate::agentflow::tool::ToolContext;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Replans allowed before a run fails.
pub const MAX_REPLANS: u32 = 3;

/// Follow-up actions requested per expansion.
const MAX_EXPANSION_ACTIONS: usize = 3;

/// Fired when a plan is approved, with a text summary of the tree.
pub type ApprovalCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Planner tuning knobs.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Search used to produce the best path.
    pub algorithm: SearchAlgorithm,
    /// Shared search parameters (beam width, depth, iteration budget).
    pub search: SearchConfig,
    /// Replans allowed before the run fails.
    pub max_replans: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            algorithm: SearchAlgorithm::Beam,
            search: SearchConfig::default(),
            max_replans: MAX_REPLANS,
        }
    }
}

/// Classify a goal into a task type by keyword.
pub fn classify_task_type(goal: &str) -> &'static str {
    let lowered = goal.to_lowercase();
    if lowered.contains("fix") || lowered.contains("bug") || lowered.contains("broken") {
        "bugfix"
    } else if lowered.contains("refactor") || lowered.contains("clean up") || lowered.contains("restructure") {
        "refactoring"
    } else if lowered.contains("implement") || lowered.contains("add ") || lowered.contains("build ") || lowered.contains("create ") {
        "implementation"
    } else if lowered.contains("test") || lowered.contains("verify") || lowered.contains("coverage") {
        "testing"
    } else if lowered.contains("explore") || lowered.contains("find ") || lowered.contains("understand") || lowered.contains("investigate") {
        "exploration"
    } else {
        "general"
    }
}

/// Outcome of a plan-driven run.
#[derive(Debug, Clone)]
pub struct PlanRunOutcome {
    /// Final output text (the last completed node's result).
    pub text: String,
    /// Number of replans performed.
    pub replans: u32,
    /// Terminal error, when the run failed.
    pub error: Option<AgentError>,
}

/// Everything node execution may need.
pub struct PlanEnv {
    /// Provider used for non-delegate actions.
    pub provider: Arc<dyn Provider>,
    /// Executor for function calls the provider emits while running a node.
    pub executor: Option<Arc<ToolExecutor>>,
    /// Runner used for delegate actions.
    pub runner: Option<Arc<Runner>>,
    /// Reflector consulted for an advisory note on node failure.
    pub reflector: Option<Arc<Reflector>>,
    /// Cancellation scope for tool execution.
    pub ctx: ToolContext,
}

/// Builds plan trees and drives their execution.
pub struct Planner {
    provider: Arc<dyn Provider>,
    config: PlannerConfig,
    optimizer: Option<Arc<StrategyOptimizer>>,
    approval: Option<ApprovalCallback>,
    last_lifecycle: RwLock<Option<PlanLifecycle>>,
}

impl Planner {
    /// A planner over the given provider with default configuration.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            config: PlannerConfig::default(),
            optimizer: None,
            approval: None,
            last_lifecycle: RwLock::new(None),
        }
    }

    /// Override the configuration (builder pattern).
    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a strategy optimizer (builder pattern).
    pub fn with_optimizer(mut self, optimizer: Arc<StrategyOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Attach an approval callback (builder pattern).
    pub fn with_approval_callback(mut self, callback: ApprovalCallback) -> Self {
        self.approval = Some(callback);
        self
    }

    /// Snapshot of the most recent lifecycle, for checkpointing.
    pub fn lifecycle_snapshot(&self) -> Option<PlanLifecycle> {
        self.last_lifecycle
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store_lifecycle(&self, lifecycle: &PlanLifecycle) {
        *self
            .last_lifecycle
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(lifecycle.clone());
    }

    /// Build a plan tree for `goal`.
    ///
    /// The provider is asked for a JSON array of actions; the first becomes
    /// the root, the rest (capped at `beam_width − 1`) become root children.
    /// A parse failure falls back to a single-action tree fabricated from
    /// the goal text. After building, the configured search sets
    /// `best_path`.
    pub async fn build_plan(&self, goal: &str) -> Result<PlanTree, AgentError> {
        let mut actions = self.request_actions(goal, None).await;
        if actions.is_empty() {
            log::warn!("planner: no parseable actions, fabricating single-action plan");
            actions = vec![PlanAction::new(ActionKind::ToolCall, goal)];
        }

        let task_type = classify_task_type(goal);
        let mut rest: Vec<PlanAction> = actions.split_off(1);
        rest.truncate(self.config.search.beam_width.saturating_sub(1));

        // Historically best strategy first.
        if let Some(optimizer) = &self.optimizer {
            if let Some((best, _rate)) = optimizer.best_strategy(task_type) {
                if let Some(pos) = rest.iter().position(|a| a.strategy == best) {
                    let favored = rest.remove(pos);
                    rest.insert(0, favored);
                }
            }
        }

        let mut tree = PlanTree::new(actions.remove(0));
        let root_id = tree.root_id.clone();
        for action in rest {
            tree.add_child(&root_id, action)?;
        }

        let expander = ProviderExpander {
            planner: self,
        };
        run_search(
            self.config.algorithm,
            &mut tree,
            goal,
            &expander,
            self.optimizer.as_ref(),
            &self.config.search,
        )
        .await?;

        Ok(tree)
    }

    /// Ask the provider for candidate actions; empty on any failure.
    async fn request_actions(&self, goal: &str, failure: Option<&str>) -> Vec<PlanAction> {
        let mut prompt = format!(
            "Plan the next steps for this goal:\n{}\n\n\
             Reply with only a JSON array of actions, most promising first:\n\
             [{{\"action\": \"tool_call|delegate|verify|decompose\", \
             \"description\": \"what to do\", \"agent_type\": \"optional target\"}}]",
            goal
        );
        if let Some(failure) = failure {
            prompt.push_str(&format!(
                "\n\nThe previous plan failed with: {}\nPlan around that failure.",
                failure
            ));
        }

        let response = match self.provider.send_message(&prompt).await {
            Ok(stream) => match stream.collect().await {
                Ok(response) => response,
                Err(err) => {
                    log::warn!("planner: stream failed: {}", err);
                    return Vec::new();
                }
            },
            Err(err) => {
                log::warn!("planner: provider failed: {}", err);
                return Vec::new();
            }
        };

        parse_actions(&response.text)
    }

    /// Execute a plan for `goal` through its lifecycle, replanning on node
    /// failure up to the budget.
    ///
    /// A failed initial build is fatal. Replans feed the failure into a
    /// regenerated tree and walk failed → draft → approved → executing.
    pub async fn run_plan(&self, goal: &str, env: &PlanEnv) -> Result<PlanRunOutcome, AgentError> {
        let tree = self.build_plan(goal).await?;
        let mut lifecycle = PlanLifecycle::new(tree);
        let mut last_output = String::new();

        loop {
            lifecycle.transition(PlanState::Approved)?;
            if let Some(approval) = &self.approval {
                approval(&lifecycle.summary());
            }
            lifecycle.transition(PlanState::Executing)?;
            self.store_lifecycle(&lifecycle);

            let failure: Option<(String, String)> = loop {
                let ready = lifecycle.tree.ready_nodes();
                if ready.is_empty() {
                    break None;
                }

                let mut node_failure = None;
                for node_id in ready {
                    lifecycle
                        .tree
                        .record_result(&node_id, NodeStatus::Running, None);
                    let node = match lifecycle.tree.node(&node_id) {
                        Some(node) => node.clone(),
                        None => continue,
                    };
                    log::info!(
                        "plan {}: executing node {} ({:?})",
                        lifecycle.plan_id,
                        node_id,
                        node.action.kind
                    );

                    match execute_node(&node, env).await {
                        Ok(output) => {
                            last_output = output.clone();
                            lifecycle.tree.record_result(
                                &node_id,
                                NodeStatus::Completed,
                                Some(output),
                            );
                        }
                        Err(err) => {
                            lifecycle.tree.record_result(
                                &node_id,
                                NodeStatus::Failed,
                                Some(err.to_string()),
                            );
                            node_failure = Some((node_id.clone(), err.to_string()));
                            break;
                        }
                    }
                }

                if node_failure.is_some() {
                    break node_failure;
                }
            };

            match failure {
                None => {
                    lifecycle.transition(PlanState::Completed)?;
                    self.store_lifecycle(&lifecycle);
                    return Ok(PlanRunOutcome {
                        text: last_output,
                        replans: lifecycle.replan_count,
                        error: None,
                    });
                }
                Some((node_id, error)) => {
                    if let Some(reflector) = &env.reflector {
                        let advisory = reflector
                            .analyze("plan_node", &serde_json::Map::new(), &error)
                            .await;
                        log::info!(
                            "plan {}: node {} failed ({}): {}",
                            lifecycle.plan_id,
                            node_id,
                            advisory.category,
                            advisory.suggestion
                        );
                    }

                    lifecycle.transition(PlanState::Failed)?;
                    if lifecycle.replan_count >= self.config.max_replans {
                        self.store_lifecycle(&lifecycle);
                        return Ok(PlanRunOutcome {
                            text: last_output,
                            replans: lifecycle.replan_count,
                            error: Some(AgentError::planning(format!(
                                "replan budget exhausted: {}",
                                error
                            ))),
                        });
                    }

                    let mut actions = self.request_actions(goal, Some(&error)).await;
                    if actions.is_empty() {
                        actions = vec![PlanAction::new(ActionKind::ToolCall, goal)];
                    }
                    let mut rest: Vec<PlanAction> = actions.split_off(1);
                    rest.truncate(self.config.search.beam_width.saturating_sub(1));
                    let mut new_tree = PlanTree::new(actions.remove(0));
                    let root_id = new_tree.root_id.clone();
                    for action in rest {
                        new_tree.add_child(&root_id, action)?;
                    }
                    lifecycle.replan(new_tree, error)?;
                    self.store_lifecycle(&lifecycle);
                }
            }
        }
    }
}

/// Execute one node through the environment.
///
/// Delegate actions go to the runner when one is available; everything else
/// prompts the provider, executing any function calls it emits and failing
/// when any call reports an error.
async fn execute_node(node: &PlanNode, env: &PlanEnv) -> Result<String, AgentError> {
    if node.action.kind == ActionKind::Delegate {
        if let Some(runner) = &env.runner {
            let agent_type = node.action.agent_type.as_deref().unwrap_or("general");
            let result = runner.spawn(agent_type, &node.action.prompt).await;
            return match result.error {
                None => Ok(result.text),
                Some(err) => Err(err),
            };
        }
    }

    let history: Vec<Content> = Vec::new();
    let stream = env
        .provider
        .send_message_with_history(&history, &node.action.prompt)
        .await?;
    let response = stream.collect().await?;

    if !response.has_function_calls() {
        return Ok(response.text);
    }

    let executor = match &env.executor {
        Some(executor) => executor,
        None => {
            return Err(AgentError::planning(
                "node requested tool calls but no executor is attached",
            ))
        }
    };

    let mut output = response.text.clone();
    let executed = executor
        .execute_calls(&env.ctx, &response.function_calls)
        .await;
    for call in executed {
        if !call.result.success {
            return Err(AgentError::other(format!(
                "tool '{}' failed: {}",
                call.name,
                call.result
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&call.result.content);
    }
    Ok(output)
}

/// Expander that asks the planner's provider for follow-up actions.
struct ProviderExpander<'a> {
    planner: &'a Planner,
}

#[async_trait]
impl<'a> NodeExpander for ProviderExpander<'a> {
    async fn expand(&self, goal: &str, node: &PlanNode) -> Result<Vec<PlanAction>, AgentError> {
        let prompt = format!(
            "Goal: {}\nThe current step is: {}\n\n\
             Reply with only a JSON array of up to {} follow-up actions:\n\
             [{{\"action\": \"tool_call|delegate|verify|decompose\", \"description\": \"...\"}}]",
            goal, node.action.description, MAX_EXPANSION_ACTIONS
        );
        let response = match self.planner.provider.send_message(&prompt).await {
            Ok(stream) => match stream.collect().await {
                Ok(response) => response,
                Err(_) => return Ok(Vec::new()),
            },
            Err(_) => return Ok(Vec::new()),
        };
        let mut actions = parse_actions(&response.text);
        actions.truncate(MAX_EXPANSION_ACTIONS);
        Ok(actions)
    }
}

/// Parse a JSON array of actions out of model text, tolerating fences.
fn parse_actions(text: &str) -> Vec<PlanAction> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let start = match cleaned.find('[') {
        Some(start) => start,
        None => return Vec::new(),
    };
    let end = match cleaned.rfind(']') {
        Some(end) if end > start => end,
        _ => return Vec::new(),
    };
    let parsed: Value = match serde_json::from_str(&cleaned[start..=end]) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };
    let array = match parsed.as_array() {
        Some(array) => array,
        None => return Vec::new(),
    };

    array
        .iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            let kind = ActionKind::parse(obj.get("action").and_then(Value::as_str).unwrap_or(""));
            let description = obj
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            if description.is_empty() {
                return None;
            }
            let mut action = PlanAction::new(kind, description);
            action.agent_type = obj
                .get("agent_type")
                .and_then(Value::as_str)
                .map(str::to_string);
            action.strategy = match kind {
                ActionKind::ToolCall => "tool_call",
                ActionKind::Delegate => "delegate",
                ActionKind::Verify => "verify",
                ActionKind::Decompose => "decompose",
            }
            .to_string();
            Some(action)
        })
        .collect()
}
