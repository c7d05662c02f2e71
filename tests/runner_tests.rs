use agentflow::content::{Content, Part};
use agentflow::provider::{Provider, StreamChunk, StreamResponse};
use agentflow::runner::{allowed_tools, default_system_prompt, Runner, RunnerStatus};
use agentflow::tool::{ParameterSchema, Tool, ToolContext, ToolDeclaration, ToolResult};
use agentflow::{AgentError, ToolRegistry};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Provider that records the system instructions and tool sets published to
/// it, and answers every send with a fixed text.
struct RecordingProvider {
    inner: Arc<RecordingInner>,
}

struct RecordingInner {
    instructions: Mutex<Vec<String>>,
    tool_sets: Mutex<Vec<Vec<String>>>,
    clones: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay_ms: u64,
}

impl RecordingProvider {
    fn new(delay_ms: u64) -> Self {
        Self {
            inner: Arc::new(RecordingInner {
                instructions: Mutex::new(Vec::new()),
                tool_sets: Mutex::new(Vec::new()),
                clones: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay_ms,
            }),
        }
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    async fn send_message_with_history(
        &self,
        _history: &[Content],
        message: &str,
    ) -> Result<StreamResponse, AgentError> {
        let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(self.inner.delay_ms)).await;
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        Ok(StreamResponse::from_chunks(vec![
            StreamChunk::text(format!("answered: {}", message)).finished(),
        ]))
    }

    async fn send_function_responses_with_history(
        &self,
        _history: &[Content],
        _responses: &[Part],
    ) -> Result<StreamResponse, AgentError> {
        Ok(StreamResponse::from_chunks(vec![
            StreamChunk::text("ok").finished(),
        ]))
    }

    async fn set_tools(&self, tools: Vec<ToolDeclaration>) {
        self.inner
            .tool_sets
            .lock()
            .unwrap()
            .push(tools.into_iter().map(|t| t.name).collect());
    }

    async fn set_system_instruction(&self, instruction: &str) {
        self.inner
            .instructions
            .lock()
            .unwrap()
            .push(instruction.to_string());
    }

    fn model_name(&self) -> &str {
        "recording"
    }

    fn clone_provider(&self) -> Arc<dyn Provider> {
        self.inner.clones.fetch_add(1, Ordering::SeqCst);
        Arc::new(RecordingProvider {
            inner: Arc::clone(&self.inner),
        })
    }
}

struct NamedTool(&'static str);

#[async_trait]
impl Tool for NamedTool {
    fn name(&self) -> &str {
        self.0
    }
    fn description(&self) -> &str {
        "test tool"
    }
    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::object()
    }
    async fn execute(&self, _ctx: &ToolContext, _args: Map<String, Value>) -> ToolResult {
        ToolResult::success("ok")
    }
}

async fn base_registry() -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    for name in ["read", "write", "bash", "grep", "list_dir"].iter() {
        registry.register(Arc::new(NamedTool(name))).await;
    }
    registry
}

#[tokio::test]
async fn spawn_clones_provider_and_filters_tools() {
    let provider = Arc::new(RecordingProvider::new(1));
    let inner = Arc::clone(&provider.inner);
    let runner = Arc::new(Runner::new(provider, base_registry().await));

    let result = runner.spawn("explore", "map the repo").await;
    assert!(result.error.is_none());
    assert!(result.text.contains("map the repo"));

    // The provider was cloned for the spawned agent.
    assert_eq!(inner.clones.load(Ordering::SeqCst), 1);

    // The explore preset filtered the tool set down to read-only tools.
    let tool_sets = inner.tool_sets.lock().unwrap();
    let published = tool_sets.last().unwrap();
    assert!(published.contains(&"read".to_string()));
    assert!(published.contains(&"grep".to_string()));
    assert!(!published.contains(&"write".to_string()));
    assert!(!published.contains(&"bash".to_string()));

    // The explore system prompt was applied.
    let instructions = inner.instructions.lock().unwrap();
    assert!(instructions
        .last()
        .unwrap()
        .contains("exploration agent"));
}

#[tokio::test]
async fn spawn_results_are_tracked() {
    let provider = Arc::new(RecordingProvider::new(1));
    let runner = Arc::new(Runner::new(provider, base_registry().await));

    let result = runner.spawn("general", "small task").await;
    assert!(result.error.is_none());
    assert_eq!(runner.tracked_count(), 1);
}

#[tokio::test]
async fn spawn_async_completes_in_background() {
    let provider = Arc::new(RecordingProvider::new(10));
    let runner = Arc::new(Runner::new(provider, base_registry().await));

    let handle = runner.spawn_async("general", "background task").await;
    let id = handle.id.clone();
    handle.wait().await;

    let record = runner.result(&id).expect("record should exist");
    assert_eq!(record.status, RunnerStatus::Completed);
    assert!(record.result.unwrap().text.contains("background task"));
}

#[tokio::test]
async fn spawn_async_cancellation_marks_the_record() {
    let provider = Arc::new(RecordingProvider::new(5_000));
    let runner = Arc::new(Runner::new(provider, base_registry().await));

    let handle = runner.spawn_async("general", "very slow task").await;
    let id = handle.id.clone();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.cancel();
    handle.wait().await;

    let record = runner.result(&id).expect("record should exist");
    assert_eq!(record.status, RunnerStatus::Cancelled);
}

#[tokio::test]
async fn async_spawns_respect_the_agent_cap() {
    let provider = Arc::new(RecordingProvider::new(30));
    let inner = Arc::clone(&provider.inner);
    let runner = Arc::new(Runner::new(provider, base_registry().await));

    let mut handles = Vec::new();
    for i in 0..20 {
        handles.push(runner.spawn_async("general", &format!("task {}", i)).await);
    }
    for handle in handles {
        handle.wait().await;
    }

    assert!(
        inner.peak.load(Ordering::SeqCst) <= agentflow::runner::MAX_AGENTS,
        "peak {} exceeded MAX_AGENTS",
        inner.peak.load(Ordering::SeqCst)
    );
}

#[test]
fn type_presets_are_consistent() {
    assert!(allowed_tools("general").is_none());
    assert!(allowed_tools("explore").unwrap().contains(&"read".to_string()));
    assert!(allowed_tools("plan").unwrap().is_empty());
    assert!(default_system_prompt("plan").contains("planning agent"));
    assert!(default_system_prompt("unknown-kind").contains("general agent"));
}
