use agentflow::content::{history_is_well_formed, Content, FunctionCall, Part};
use agentflow::provider::{Provider, StreamChunk, StreamResponse};
use agentflow::tool::{
    ParameterSchema, ParameterType, Tool, ToolContext, ToolDeclaration, ToolResult,
};
use agentflow::{Agent, AgentConfig, ToolRegistry};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Provider that replays a scripted list of chunk streams, one per send.
/// Once the script is exhausted it answers with a plain "done" text.
struct ScriptedProvider {
    inner: Arc<ScriptedInner>,
}

struct ScriptedInner {
    turns: Mutex<VecDeque<Vec<StreamChunk>>>,
    sends: AtomicUsize,
}

impl ScriptedProvider {
    fn new(turns: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            inner: Arc::new(ScriptedInner {
                turns: Mutex::new(turns.into()),
                sends: AtomicUsize::new(0),
            }),
        }
    }

    fn sends(&self) -> usize {
        self.inner.sends.load(Ordering::SeqCst)
    }

    fn next_stream(&self) -> StreamResponse {
        self.inner.sends.fetch_add(1, Ordering::SeqCst);
        let chunks = self
            .inner
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![StreamChunk::text("done").finished()]);
        StreamResponse::from_chunks(chunks)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn send_message_with_history(
        &self,
        _history: &[Content],
        _message: &str,
    ) -> Result<StreamResponse, agentflow::AgentError> {
        Ok(self.next_stream())
    }

    async fn send_function_responses_with_history(
        &self,
        _history: &[Content],
        _responses: &[Part],
    ) -> Result<StreamResponse, agentflow::AgentError> {
        Ok(self.next_stream())
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

/// Echo tool that records how many times it ran.
struct EchoTool {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the x argument back"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::object().with_property(
            "x",
            ParameterSchema::new(ParameterType::String),
            true,
        )
    }

    async fn execute(&self, _ctx: &ToolContext, args: Map<String, Value>) -> ToolResult {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let x = args.get("x").and_then(Value::as_str).unwrap_or_default();
        ToolResult::success(x)
    }
}

fn call(name: &str, args: Value) -> FunctionCall {
    FunctionCall::new(name, args)
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn registry_with_echo(executions: Arc<AtomicUsize>) -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(EchoTool { executions })).await;
    registry
}

#[tokio::test]
async fn happy_path_no_tools() {
    init_logging();
    let provider = Arc::new(ScriptedProvider::new(vec![vec![
        StreamChunk::text("hello").finished(),
    ]]));
    let registry = Arc::new(ToolRegistry::new());
    let agent = Agent::new("greeter", provider, registry).with_config(AgentConfig {
        max_turns: 5,
        ..AgentConfig::default()
    });

    let result = agent.run("hi").await;
    assert_eq!(result.text, "hello");
    assert_eq!(result.turns, 1);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn single_tool_round_trip() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![StreamChunk::calls(vec![call("echo", serde_json::json!({"x": "A"}))]).finished()],
        vec![StreamChunk::text("done").finished()],
    ]));
    let executions = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_echo(Arc::clone(&executions)).await;
    let agent = Agent::new("worker", provider, registry);

    let result = agent.run("echo A").await;
    assert!(result.error.is_none());
    assert_eq!(result.text, "done");
    assert_eq!(result.turns, 2);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    // user, model(call), user(response), model(text)
    let history = agent.history();
    assert_eq!(history.len(), 4);
    assert!(history_is_well_formed(&history));
    assert_eq!(agent.tools_used(), vec!["echo".to_string()]);
}

#[tokio::test]
async fn exact_loop_intervenes_on_third_identical_call() {
    init_logging();
    // Three turns of the identical call, then a clean finish.
    let repeated =
        || vec![StreamChunk::calls(vec![call("echo", serde_json::json!({"x": "x"}))]).finished()];
    let provider = Arc::new(ScriptedProvider::new(vec![
        repeated(),
        repeated(),
        repeated(),
        vec![StreamChunk::text("recovered").finished()],
    ]));
    let executions = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_echo(Arc::clone(&executions)).await;
    let agent = Agent::new("looper", provider, registry);

    let result = agent.run("loop").await;
    assert!(result.error.is_none());
    assert_eq!(result.text, "recovered");

    // The third occurrence was intercepted before execution.
    assert_eq!(executions.load(Ordering::SeqCst), 2);

    // An intervention message landed in history.
    let history = agent.history();
    let has_intervention = history.iter().any(|content| {
        content
            .joined_text()
            .contains("repeated the exact same 'echo' call")
    });
    assert!(has_intervention);
}

#[tokio::test]
async fn exact_loop_tolerates_different_arguments() {
    // Same tool, different args each turn: no intervention, all executed.
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![StreamChunk::calls(vec![call("echo", serde_json::json!({"x": "1"}))]).finished()],
        vec![StreamChunk::calls(vec![call("echo", serde_json::json!({"x": "2"}))]).finished()],
        vec![StreamChunk::calls(vec![call("echo", serde_json::json!({"x": "3"}))]).finished()],
        vec![StreamChunk::text("ok").finished()],
    ]));
    let executions = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_echo(Arc::clone(&executions)).await;
    let agent = Agent::new("varied", provider, registry);

    let result = agent.run("go").await;
    assert!(result.error.is_none());
    assert_eq!(executions.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn broad_loop_fires_on_eighth_same_name_call() {
    // Distinct args every turn defeat the exact layer but trip the broad
    // layer on the eighth same-name call.
    let mut turns: Vec<Vec<StreamChunk>> = (0..8)
        .map(|i| {
            vec![StreamChunk::calls(vec![call(
                "echo",
                serde_json::json!({ "x": format!("arg{}", i) }),
            )])
            .finished()]
        })
        .collect();
    turns.push(vec![StreamChunk::text("changed approach").finished()]);

    let provider = Arc::new(ScriptedProvider::new(turns));
    let executions = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_echo(Arc::clone(&executions)).await;
    let agent = Agent::new("broad", provider, registry).with_config(AgentConfig {
        max_turns: 20,
        ..AgentConfig::default()
    });

    let result = agent.run("go").await;
    assert!(result.error.is_none());

    let history = agent.history();
    let has_broad_intervention = history
        .iter()
        .any(|content| content.joined_text().contains("change your approach"));
    assert!(has_broad_intervention);
    // The eighth call was intercepted before execution.
    assert_eq!(executions.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn max_turns_exhaustion_fails_the_run() {
    // The model keeps calling tools forever with fresh args.
    let turns: Vec<Vec<StreamChunk>> = (0..10)
        .map(|i| {
            vec![StreamChunk::calls(vec![call(
                "echo",
                serde_json::json!({ "x": format!("{}", i) }),
            )])
            .finished()]
        })
        .collect();
    let provider = Arc::new(ScriptedProvider::new(turns));
    let executions = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_echo(executions).await;
    let agent = Agent::new("tired", provider, registry).with_config(AgentConfig {
        max_turns: 3,
        ..AgentConfig::default()
    });

    let result = agent.run("go").await;
    let error = result.error.expect("run should fail");
    assert!(error.to_string().contains("maximum turns"));
    assert_eq!(result.turns, 4); // the failing turn is counted
}

#[tokio::test]
async fn failed_tool_is_captured_not_raised() {
    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::object()
        }
        async fn execute(&self, _ctx: &ToolContext, _args: Map<String, Value>) -> ToolResult {
            ToolResult::failure("no such file or directory: /tmp/missing.txt")
        }
    }

    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![StreamChunk::calls(vec![call("flaky", serde_json::json!({}))]).finished()],
        vec![StreamChunk::text("gave up gracefully").finished()],
    ]));
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(FailingTool)).await;
    let reflector = Arc::new(agentflow::reflector::Reflector::new());
    let agent = Agent::new("resilient", provider, registry).with_reflector(reflector);

    let result = agent.run("try it").await;
    assert!(result.error.is_none(), "tool failure must not fail the run");
    assert_eq!(result.text, "gave up gracefully");

    // The failure surfaced in history: an error response plus a reflection
    // intervention.
    let history = agent.history();
    let has_error_response = history.iter().any(|content| {
        content.parts.iter().any(|part| match part {
            Part::FunctionResponse { response, .. } => response.contains_key("error"),
            _ => false,
        })
    });
    assert!(has_error_response);
    let has_reflection = history
        .iter()
        .any(|content| content.joined_text().contains("Category: file_not_found"));
    assert!(has_reflection);
}

#[tokio::test]
async fn parallel_calls_preserve_response_order() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![StreamChunk::calls(vec![
            call("echo", serde_json::json!({"x": "first"})).with_id("c1"),
            call("echo", serde_json::json!({"x": "second"})).with_id("c2"),
            call("echo", serde_json::json!({"x": "third"})).with_id("c3"),
        ])
        .finished()],
        vec![StreamChunk::text("ok").finished()],
    ]));
    let executions = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_echo(executions).await;
    let agent = Agent::new("parallel", provider, registry);

    let result = agent.run("go").await;
    assert!(result.error.is_none());

    let history = agent.history();
    let responses: Vec<(String, String)> = history
        .iter()
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| match part {
            Part::FunctionResponse { id, name, .. } => Some((id.clone(), name.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        responses,
        vec![
            ("c1".to_string(), "echo".to_string()),
            ("c2".to_string(), "echo".to_string()),
            ("c3".to_string(), "echo".to_string()),
        ]
    );
    assert!(history_is_well_formed(&history));
}

#[tokio::test]
async fn cancellation_stops_the_run() {
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps"
        }
        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::object()
        }
        async fn execute(&self, _ctx: &ToolContext, _args: Map<String, Value>) -> ToolResult {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            ToolResult::success("never")
        }
    }

    let provider = Arc::new(ScriptedProvider::new(vec![vec![StreamChunk::calls(
        vec![call("slow", serde_json::json!({}))],
    )
    .finished()]]));
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(SlowTool)).await;
    let agent = Arc::new(Agent::new("cancellable", provider, registry));

    let background = Arc::clone(&agent);
    let handle = tokio::spawn(async move { background.run("go").await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    agent.cancel();

    let result = handle.await.unwrap();
    let error = result.error.expect("cancelled run must fail");
    assert_eq!(error.kind, agentflow::ErrorKind::Cancelled);
}

#[tokio::test]
async fn progress_is_readable_during_run() {
    let provider = Arc::new(ScriptedProvider::new(vec![vec![
        StreamChunk::text("hi").finished(),
    ]]));
    let registry = Arc::new(ToolRegistry::new());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let agent = Agent::new("observed", provider, registry).with_progress_callback(Arc::new(
        move |progress: &agentflow::Progress| {
            seen_clone.lock().unwrap().push(progress.status);
        },
    ));

    let result = agent.run("hello").await;
    assert!(result.error.is_none());

    let statuses = seen.lock().unwrap().clone();
    assert_eq!(statuses.first(), Some(&agentflow::ProgressStatus::Running));
    assert_eq!(statuses.last(), Some(&agentflow::ProgressStatus::Completed));
}

#[tokio::test]
async fn provider_send_counts_match_turns() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![StreamChunk::calls(vec![call("echo", serde_json::json!({"x": "A"}))]).finished()],
        vec![StreamChunk::text("done").finished()],
    ]));
    let executions = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_echo(executions).await;
    let provider_handle = Arc::clone(&provider);
    let agent = Agent::new("counted", provider, registry);

    let result = agent.run("go").await;
    assert!(result.error.is_none());
    assert_eq!(provider_handle.sends(), 2);
}

#[tokio::test]
async fn canonical_key_drops_zero_valued_arguments() {
    use agentflow::agent::canonical_call_key;

    let with_defaults = call(
        "read",
        serde_json::json!({"path": "x", "offset": 0, "limit": null, "follow": false}),
    );
    let bare = call("read", serde_json::json!({"path": "x"}));
    assert_eq!(canonical_call_key(&with_defaults), canonical_call_key(&bare));

    let different = call("read", serde_json::json!({"path": "y"}));
    assert_ne!(canonical_call_key(&bare), canonical_call_key(&different));
}
