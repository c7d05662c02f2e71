use agentflow::content::{Content, Part};
use agentflow::error::AgentError;
use agentflow::plan::{
    ActionKind, NodeStatus, PlanAction, PlanLifecycle, PlanState, PlanTree,
};
use agentflow::planner::{classify_task_type, PlanEnv, Planner, PlannerConfig};
use agentflow::provider::{Provider, StreamChunk, StreamResponse};
use agentflow::search::{
    astar_search, beam_search, mcts_search, NodeExpander, SearchAlgorithm, SearchConfig,
};
use agentflow::tool::{ToolContext, ToolDeclaration};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Provider replaying scripted text responses.
struct ScriptedProvider {
    inner: Arc<Mutex<VecDeque<Result<String, AgentError>>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Result<String, AgentError>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(responses.into())),
        }
    }

    fn next_stream(&self) -> Result<StreamResponse, AgentError> {
        let next = self
            .inner
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()));
        match next {
            Ok(text) => Ok(StreamResponse::from_chunks(vec![
                StreamChunk::text(text).finished(),
            ])),
            Err(err) => Ok(StreamResponse::from_chunks(vec![StreamChunk::error(err)])),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn send_message_with_history(
        &self,
        _history: &[Content],
        _message: &str,
    ) -> Result<StreamResponse, AgentError> {
        self.next_stream()
    }

    async fn send_function_responses_with_history(
        &self,
        _history: &[Content],
        _responses: &[Part],
    ) -> Result<StreamResponse, AgentError> {
        self.next_stream()
    }

    async fn set_tools(&self, _tools: Vec<ToolDeclaration>) {}
    async fn set_system_instruction(&self, _instruction: &str) {}

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn clone_provider(&self) -> Arc<dyn Provider> {
        Arc::new(ScriptedProvider {
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Expander producing a fixed number of children per call.
struct StaticExpander {
    per_node: usize,
}

#[async_trait]
impl NodeExpander for StaticExpander {
    async fn expand(
        &self,
        _goal: &str,
        node: &agentflow::plan::PlanNode,
    ) -> Result<Vec<PlanAction>, AgentError> {
        Ok((0..self.per_node)
            .map(|i| {
                PlanAction::new(
                    ActionKind::ToolCall,
                    format!("{} / step {}", node.action.description, i),
                )
            })
            .collect())
    }
}

fn shallow_config() -> SearchConfig {
    SearchConfig {
        beam_width: 2,
        max_depth: 2,
        iterations: 20,
        max_tree_nodes: 16,
        ..SearchConfig::default()
    }
}

#[test]
fn lifecycle_accepts_only_legal_transitions() {
    let tree = PlanTree::new(PlanAction::new(ActionKind::ToolCall, "do it"));
    let mut lifecycle = PlanLifecycle::new(tree);
    assert_eq!(lifecycle.state, PlanState::Draft);
    let version = lifecycle.version;

    // Illegal: draft -> executing. Nothing changes.
    let before_updated = lifecycle.updated_at;
    assert!(lifecycle.transition(PlanState::Executing).is_err());
    assert_eq!(lifecycle.state, PlanState::Draft);
    assert_eq!(lifecycle.version, version);
    assert_eq!(lifecycle.updated_at, before_updated);

    // Legal chain, version strictly increasing.
    lifecycle.transition(PlanState::Approved).unwrap();
    assert_eq!(lifecycle.version, version + 1);
    lifecycle.transition(PlanState::Executing).unwrap();
    lifecycle.transition(PlanState::Paused).unwrap();
    lifecycle.transition(PlanState::Executing).unwrap();
    lifecycle.transition(PlanState::Completed).unwrap();
    assert_eq!(lifecycle.version, version + 5);

    // Completed is terminal.
    assert!(lifecycle.transition(PlanState::Draft).is_err());
    assert!(lifecycle.transition(PlanState::Executing).is_err());
}

#[test]
fn replan_walks_failed_to_draft_and_counts() {
    let tree = PlanTree::new(PlanAction::new(ActionKind::ToolCall, "first"));
    let mut lifecycle = PlanLifecycle::new(tree);
    lifecycle.transition(PlanState::Approved).unwrap();
    lifecycle.transition(PlanState::Executing).unwrap();
    lifecycle.transition(PlanState::Failed).unwrap();

    let new_tree = PlanTree::new(PlanAction::new(ActionKind::ToolCall, "second"));
    lifecycle.replan(new_tree, "node exploded").unwrap();
    assert_eq!(lifecycle.state, PlanState::Draft);
    assert_eq!(lifecycle.replan_count, 1);
    assert_eq!(lifecycle.replan_reason.as_deref(), Some("node exploded"));
}

#[test]
fn ready_nodes_require_completed_parent_and_prerequisites() {
    let mut tree = PlanTree::new(PlanAction::new(ActionKind::ToolCall, "root"));
    let root = tree.root_id.clone();
    let a = tree
        .add_child(&root, PlanAction::new(ActionKind::ToolCall, "a"))
        .unwrap();
    let b = tree
        .add_child(&root, PlanAction::new(ActionKind::Verify, "b"))
        .unwrap();
    tree.node_mut(&b).unwrap().prerequisites = vec![a.clone()];

    // Only the root is ready at first.
    assert_eq!(tree.ready_nodes(), vec![root.clone()]);

    tree.record_result(&root, NodeStatus::Completed, Some("done".into()));
    // a is ready; b still waits on its prerequisite.
    assert_eq!(tree.ready_nodes(), vec![a.clone()]);

    tree.record_result(&a, NodeStatus::Completed, Some("done".into()));
    assert_eq!(tree.ready_nodes(), vec![b.clone()]);

    tree.record_result(&b, NodeStatus::Failed, None);
    assert!(tree.ready_nodes().is_empty());
}

#[test]
fn backpropagation_only_grows_counters() {
    let mut tree = PlanTree::new(PlanAction::new(ActionKind::ToolCall, "root"));
    let root = tree.root_id.clone();
    let child = tree
        .add_child(&root, PlanAction::new(ActionKind::Verify, "check"))
        .unwrap();

    tree.backpropagate(&child, 1.0, 0.9);
    tree.backpropagate(&child, 0.5, 0.9);

    let child_node = tree.node(&child).unwrap();
    assert_eq!(child_node.visits, 2);
    assert!((child_node.total_reward - 1.5).abs() < 1e-9);

    let root_node = tree.node(&root).unwrap();
    assert_eq!(root_node.visits, 2);
    // Root received decayed rewards: 0.9 + 0.45.
    assert!((root_node.total_reward - 1.35).abs() < 1e-9);
}

#[tokio::test]
async fn beam_search_expands_and_records_a_best_path() {
    let mut tree = PlanTree::new(PlanAction::new(ActionKind::ToolCall, "root"));
    let root = tree.root_id.clone();
    tree.add_child(&root, PlanAction::new(ActionKind::ToolCall, "alt"))
        .unwrap();

    let expander = StaticExpander { per_node: 2 };
    let path = beam_search(&mut tree, "goal", &expander, None, &shallow_config())
        .await
        .unwrap();

    assert_eq!(path.first(), Some(&root));
    assert!(path.len() > 1);
    assert_eq!(tree.best_path, path);
    assert!(tree.total_nodes > 2);
    assert!(tree.total_nodes <= 16);
}

#[tokio::test]
async fn mcts_search_visits_and_selects_by_reward() {
    let mut tree = PlanTree::new(PlanAction::new(ActionKind::ToolCall, "root"));
    let expander = StaticExpander { per_node: 2 };
    let path = mcts_search(&mut tree, "goal", &expander, None, &shallow_config())
        .await
        .unwrap();

    let root = tree.node(&tree.root_id).unwrap();
    assert!(root.visits > 0);
    assert!(path.first() == Some(&tree.root_id));
    assert!(path.len() >= 2, "best path should descend below the root");
}

#[tokio::test]
async fn astar_search_reconstructs_a_parent_linked_path() {
    let mut tree = PlanTree::new(PlanAction::new(ActionKind::ToolCall, "root"));
    let expander = StaticExpander { per_node: 2 };
    let path = astar_search(&mut tree, "goal", &expander, None, &shallow_config())
        .await
        .unwrap();

    assert_eq!(path.first(), Some(&tree.root_id));
    // Each consecutive pair is a parent/child edge.
    for pair in path.windows(2) {
        let child = tree.node(&pair[1]).unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(pair[0].as_str()));
    }
}

#[test]
fn lifecycle_round_trips_through_disk() {
    let mut tree = PlanTree::new(PlanAction::new(ActionKind::ToolCall, "root"));
    let root = tree.root_id.clone();
    tree.add_child(&root, PlanAction::new(ActionKind::Verify, "check"))
        .unwrap();
    let mut lifecycle = PlanLifecycle::new(tree);
    lifecycle.transition(PlanState::Approved).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.json");
    lifecycle.save(&path).unwrap();

    let loaded = PlanLifecycle::load(&path).unwrap();
    assert_eq!(loaded.plan_id, lifecycle.plan_id);
    assert_eq!(loaded.state, PlanState::Approved);
    assert_eq!(loaded.version, lifecycle.version);
    assert_eq!(loaded.tree.total_nodes, 2);
}

#[test]
fn task_types_classify_by_keyword() {
    assert_eq!(classify_task_type("fix the login bug"), "bugfix");
    assert_eq!(classify_task_type("refactor the parser"), "refactoring");
    assert_eq!(classify_task_type("implement pagination"), "implementation");
    assert_eq!(classify_task_type("add tests for the cache"), "testing");
    assert_eq!(classify_task_type("explore the repo layout"), "exploration");
    assert_eq!(classify_task_type("hello there"), "general");
}

fn no_expansion_config() -> PlannerConfig {
    PlannerConfig {
        algorithm: SearchAlgorithm::Beam,
        search: SearchConfig {
            beam_width: 3,
            max_depth: 0,
            iterations: 0,
            max_tree_nodes: 8,
            ..SearchConfig::default()
        },
        max_replans: 3,
    }
}

#[tokio::test]
async fn unparseable_plan_falls_back_to_single_action() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(
        "sorry, I cannot produce JSON".to_string()
    )]));
    let planner = Planner::new(provider).with_config(no_expansion_config());

    let tree = planner.build_plan("just do the thing").await.unwrap();
    assert_eq!(tree.total_nodes, 1);
    let root = tree.node(&tree.root_id).unwrap();
    assert_eq!(root.action.prompt, "just do the thing");
}

#[tokio::test]
async fn plan_build_uses_first_action_as_root_and_caps_alternatives() {
    let actions = r#"[
        {"action": "tool_call", "description": "main path"},
        {"action": "verify", "description": "alt one"},
        {"action": "decompose", "description": "alt two"},
        {"action": "delegate", "description": "alt three"},
        {"action": "tool_call", "description": "alt four"}
    ]"#;
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(actions.to_string())]));
    let planner = Planner::new(provider).with_config(no_expansion_config());

    let tree = planner.build_plan("implement the feature").await.unwrap();
    let root = tree.node(&tree.root_id).unwrap();
    assert_eq!(root.action.description, "main path");
    // beam_width - 1 == 2 alternatives survive.
    assert_eq!(root.children.len(), 2);
}

#[tokio::test]
async fn failed_node_triggers_replan_then_succeeds() {
    let first_plan = r#"[
        {"action": "tool_call", "description": "step one"},
        {"action": "tool_call", "description": "step two"}
    ]"#;
    let second_plan = r#"[{"action": "tool_call", "description": "fixed step"}]"#;

    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(first_plan.to_string()),                          // build
        Err(AgentError::other("tool exploded")),             // execute root
        Ok(second_plan.to_string()),                         // replan build
        Ok("second plan worked".to_string()),                // execute new root
    ]));
    let planner = Planner::new(Arc::clone(&provider) as Arc<dyn Provider>)
        .with_config(no_expansion_config());

    let env = PlanEnv {
        provider,
        executor: None,
        runner: None,
        reflector: None,
        ctx: ToolContext::new(),
    };
    let outcome = planner.run_plan("do the work", &env).await.unwrap();

    assert!(outcome.error.is_none());
    assert_eq!(outcome.replans, 1);
    assert_eq!(outcome.text, "second plan worked");

    let lifecycle = planner.lifecycle_snapshot().unwrap();
    assert_eq!(lifecycle.state, PlanState::Completed);
    assert_eq!(lifecycle.replan_count, 1);
}

#[tokio::test]
async fn replan_budget_exhaustion_fails_the_run() {
    // Every execution fails; every replan produces another single-action
    // plan. After max_replans the run gives up.
    let mut script: Vec<Result<String, AgentError>> = Vec::new();
    script.push(Ok(r#"[{"action": "tool_call", "description": "try"}]"#.to_string()));
    for _ in 0..4 {
        script.push(Err(AgentError::other("still broken")));
        script.push(Ok(r#"[{"action": "tool_call", "description": "retry"}]"#.to_string()));
    }
    let provider = Arc::new(ScriptedProvider::new(script));
    let planner = Planner::new(Arc::clone(&provider) as Arc<dyn Provider>)
        .with_config(no_expansion_config());

    let env = PlanEnv {
        provider,
        executor: None,
        runner: None,
        reflector: None,
        ctx: ToolContext::new(),
    };
    let outcome = planner.run_plan("doomed", &env).await.unwrap();
    assert_eq!(outcome.replans, 3);
    let error = outcome.error.expect("budget exhaustion must fail");
    assert!(error.to_string().contains("replan budget exhausted"));
}

#[tokio::test]
async fn approval_callback_sees_the_plan_summary() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(r#"[{"action": "tool_call", "description": "only step"}]"#.to_string()),
        Ok("finished".to_string()),
    ]));
    let summaries = Arc::new(Mutex::new(Vec::new()));
    let summaries_clone = Arc::clone(&summaries);
    let planner = Planner::new(Arc::clone(&provider) as Arc<dyn Provider>)
        .with_config(no_expansion_config())
        .with_approval_callback(Arc::new(move |summary: &str| {
            summaries_clone.lock().unwrap().push(summary.to_string());
        }));

    let env = PlanEnv {
        provider,
        executor: None,
        runner: None,
        reflector: None,
        ctx: ToolContext::new(),
    };
    let outcome = planner.run_plan("small job", &env).await.unwrap();
    assert!(outcome.error.is_none());

    let seen = summaries.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("only step"));
}
