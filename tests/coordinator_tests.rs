use agentflow::content::{Content, Part};
use agentflow::coordinator::{CoordinatedTask, Coordinator, TaskStatus};
use agentflow::error::AgentError;
use agentflow::provider::{Provider, StreamChunk, StreamResponse};
use agentflow::runner::Runner;
use agentflow::tool::ToolDeclaration;
use agentflow::ToolRegistry;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Provider that answers per prompt: prompts containing "FAIL" produce an
/// error stream, everything else echoes the prompt. Tracks concurrent
/// sends so tests can assert the parallelism cap.
struct PromptDrivenProvider {
    inner: Arc<PromptDrivenInner>,
}

struct PromptDrivenInner {
    active: AtomicUsize,
    peak: AtomicUsize,
    delay_ms: u64,
}

impl PromptDrivenProvider {
    fn new(delay_ms: u64) -> Self {
        Self {
            inner: Arc::new(PromptDrivenInner {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay_ms,
            }),
        }
    }

    fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for PromptDrivenProvider {
    async fn send_message_with_history(
        &self,
        _history: &[Content],
        message: &str,
    ) -> Result<StreamResponse, AgentError> {
        let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(self.inner.delay_ms)).await;
        self.inner.active.fetch_sub(1, Ordering::SeqCst);

        if message.contains("FAIL") {
            Ok(StreamResponse::from_chunks(vec![StreamChunk::error(
                AgentError::other("scripted task failure"),
            )]))
        } else {
            Ok(StreamResponse::from_chunks(vec![
                StreamChunk::text(format!("ok: {}", message)).finished(),
            ]))
        }
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

    async fn set_tools(&self, _tools: Vec<ToolDeclaration>) {}
    async fn set_system_instruction(&self, _instruction: &str) {}

    fn model_name(&self) -> &str {
        "prompt-driven"
    }

    fn clone_provider(&self) -> Arc<dyn Provider> {
        Arc::new(PromptDrivenProvider {
            inner: Arc::clone(&self.inner),
        })
    }
}

fn runner_over(provider: Arc<PromptDrivenProvider>) -> Arc<Runner> {
    let registry = Arc::new(ToolRegistry::new());
    Arc::new(Runner::new(provider, registry))
}

#[tokio::test]
async fn diamond_dag_runs_in_dependency_order() {
    let provider = Arc::new(PromptDrivenProvider::new(10));
    let coordinator = Coordinator::new(runner_over(provider)).with_max_parallel(2);

    let tasks = vec![
        CoordinatedTask::new("a", "task a"),
        CoordinatedTask::new("b", "task b").with_dependencies(vec!["a".into()]),
        CoordinatedTask::new("c", "task c").with_dependencies(vec!["a".into()]),
        CoordinatedTask::new("d", "task d").with_dependencies(vec!["b".into(), "c".into()]),
    ];

    let table = coordinator.run_tasks(tasks).await.unwrap();
    assert_eq!(table.len(), 4);
    for id in ["a", "b", "c", "d"].iter() {
        let task = &table[*id];
        assert_eq!(task.status, TaskStatus::Completed, "task {} not completed", id);
        assert!(task.result.as_ref().unwrap().error.is_none());
    }
}

#[tokio::test]
async fn failed_dependency_fails_dependents_but_not_siblings() {
    let provider = Arc::new(PromptDrivenProvider::new(5));
    let coordinator = Coordinator::new(runner_over(provider)).with_max_parallel(2);

    let tasks = vec![
        CoordinatedTask::new("a", "task a"),
        CoordinatedTask::new("b", "FAIL b").with_dependencies(vec!["a".into()]),
        CoordinatedTask::new("c", "task c").with_dependencies(vec!["a".into()]),
        CoordinatedTask::new("d", "task d").with_dependencies(vec!["b".into(), "c".into()]),
    ];

    let table = coordinator.run_tasks(tasks).await.unwrap();
    assert_eq!(table["a"].status, TaskStatus::Completed);
    assert_eq!(table["b"].status, TaskStatus::Failed);
    assert_eq!(table["c"].status, TaskStatus::Completed);

    let d = &table["d"];
    assert_eq!(d.status, TaskStatus::Failed);
    let error = d.result.as_ref().unwrap().error.as_ref().unwrap();
    assert!(error.to_string().contains("dependency failed"));
}

#[tokio::test]
async fn cycles_are_rejected_before_anything_runs() {
    let provider = Arc::new(PromptDrivenProvider::new(1));
    let coordinator = Coordinator::new(runner_over(provider));

    let tasks = vec![
        CoordinatedTask::new("a", "task a").with_dependencies(vec!["b".into()]),
        CoordinatedTask::new("b", "task b").with_dependencies(vec!["a".into()]),
    ];

    let error = coordinator.run_tasks(tasks).await.unwrap_err();
    assert!(error.to_string().contains("cycle"));
}

#[tokio::test]
async fn unknown_dependencies_are_rejected() {
    let tasks = vec![CoordinatedTask::new("a", "task a").with_dependencies(vec!["ghost".into()])];
    let error = Coordinator::validate(&tasks).unwrap_err();
    assert!(error.to_string().contains("unknown task"));
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    let tasks = vec![
        CoordinatedTask::new("a", "one"),
        CoordinatedTask::new("a", "two"),
    ];
    let error = Coordinator::validate(&tasks).unwrap_err();
    assert!(error.to_string().contains("duplicate task id"));
}

#[tokio::test]
async fn parallelism_respects_the_cap() {
    let provider = Arc::new(PromptDrivenProvider::new(50));
    let peak_handle = Arc::clone(&provider);
    let coordinator = Coordinator::new(runner_over(provider)).with_max_parallel(2);

    let tasks: Vec<CoordinatedTask> = (0..6)
        .map(|i| CoordinatedTask::new(format!("t{}", i), format!("task {}", i)))
        .collect();
    let table = coordinator.run_tasks(tasks).await.unwrap();

    assert!(table.values().all(|t| t.status == TaskStatus::Completed));
    assert!(
        peak_handle.peak() <= 2,
        "peak parallelism {} exceeded the cap",
        peak_handle.peak()
    );
}

#[tokio::test]
async fn priorities_order_ready_tasks() {
    let provider = Arc::new(PromptDrivenProvider::new(20));
    let coordinator = Coordinator::new(runner_over(provider)).with_max_parallel(1);

    // With max_parallel = 1 the launch order is observable through spawn
    // completion order in the runner's result table; we assert terminal
    // success and rely on the priority sort for ordering.
    let tasks = vec![
        CoordinatedTask::new("low", "task low").with_priority(1),
        CoordinatedTask::new("high", "task high").with_priority(10),
    ];
    let table = coordinator.run_tasks(tasks).await.unwrap();
    assert!(table.values().all(|t| t.status == TaskStatus::Completed));
}

#[tokio::test]
async fn run_sequential_short_circuits_on_first_error() {
    let provider = Arc::new(PromptDrivenProvider::new(1));
    let coordinator = Coordinator::new(runner_over(provider));

    let tasks = vec![
        CoordinatedTask::new("a", "task a"),
        CoordinatedTask::new("b", "FAIL b"),
        CoordinatedTask::new("c", "task c"),
    ];
    let error = coordinator.run_sequential(tasks).await.unwrap_err();
    assert!(error.to_string().contains("scripted task failure"));
}

#[tokio::test]
async fn run_parallel_returns_every_result() {
    let provider = Arc::new(PromptDrivenProvider::new(5));
    let coordinator = Coordinator::new(runner_over(provider)).with_max_parallel(3);

    let tasks: Vec<CoordinatedTask> = (0..5)
        .map(|i| CoordinatedTask::new(format!("t{}", i), format!("task {}", i)))
        .collect();
    let results = coordinator.run_parallel(tasks).await;
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.error.is_none()));
}

#[tokio::test]
async fn cancelled_task_fails_with_cancellation() {
    let provider = Arc::new(PromptDrivenProvider::new(5));
    let coordinator = Coordinator::new(runner_over(provider));

    coordinator.cancel_task("b");
    let tasks = vec![
        CoordinatedTask::new("a", "task a"),
        CoordinatedTask::new("b", "task b"),
        CoordinatedTask::new("c", "task c").with_dependencies(vec!["b".into()]),
    ];
    let table = coordinator.run_tasks(tasks).await.unwrap();

    assert_eq!(table["a"].status, TaskStatus::Completed);
    assert_eq!(table["b"].status, TaskStatus::Failed);
    assert_eq!(table["c"].status, TaskStatus::Failed);
}
